// Dbmask - Deterministic Database Anonymization Tool
// Copyright (c) 2025 Dbmask Contributors
// Licensed under the MIT License

use clap::Parser;
use dbmask::cli::{Cli, Commands};
use dbmask::config::{load_config, LoggingConfig};
use dbmask::logging::init_logging;
use std::process;

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Only `run` writes log files; the other commands log to the console.
    let (config_level, logging_config) = match &cli.command {
        Commands::Run(_) => match load_config(&cli.config) {
            Ok(config) => (Some(config.application.log_level), config.logging),
            Err(_) => (None, console_only()),
        },
        _ => (None, console_only()),
    };
    let log_level = cli
        .log_level
        .clone()
        .or(config_level)
        .unwrap_or_else(|| "info".to_string());

    let guard = match init_logging(&log_level, &logging_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(5);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Dbmask - Deterministic Database Anonymization Tool"
    );

    let exit_code = match execute_command(&cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            5
        }
    };

    drop(guard);
    process::exit(exit_code);
}

fn console_only() -> LoggingConfig {
    LoggingConfig {
        local_enabled: false,
        ..LoggingConfig::default()
    }
}

async fn execute_command(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Run(args) => args.execute(&cli.config).await,
        Commands::ValidateConfig(args) => args.execute(&cli.config).await,
        Commands::ValidateRules(args) => args.execute(&cli.config).await,
        Commands::Init(args) => args.execute().await,
    }
}
