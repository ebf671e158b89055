//! CLI interface and argument parsing

pub mod commands;

use clap::{Parser, Subcommand};

/// dbmask - deterministic database anonymization
#[derive(Parser, Debug)]
#[command(name = "dbmask")]
#[command(version, about, long_about = None)]
#[command(author = "Dbmask Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dbmask.toml", env = "DBMASK_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "DBMASK_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Anonymize the source databases into the configured output
    Run(commands::run::RunArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Validate a rule file
    ValidateRules(commands::validate_rules::ValidateRulesArgs),

    /// Create sample configuration and rule files
    Init(commands::init::InitArgs),
}
