//! Configuration management for dbmask.
//!
//! Two files drive a run:
//!
//! - `dbmask.toml` ([`DbmaskConfig`]): connections, safety settings, batch size, output
//! - `rules.toml` ([`AnonymizationRuleSet`]): database -> table -> column strategies
//!
//! Both are loaded once before the safety gate runs and are read-only afterwards.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dbmask::config::{load_config, load_rules};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("dbmask.toml")?;
//! let rules = load_rules(&config.rules_file)?;
//!
//! println!("Source: {}:{}", config.source.host, config.source.port);
//! println!("Tables: {}", rules.table_count());
//! # Ok(())
//! # }
//! ```
//!
//! # Example Configuration
//!
//! ```toml
//! rules_file = "rules.toml"
//!
//! [source]
//! host = "replica.internal"
//! username = "reader"
//! password = "${DBMASK_SOURCE_PASSWORD}"
//!
//! [safety]
//! allowed_hosts = ["replica.internal"]
//!
//! [output]
//! mode = "dump"
//! path = "./output/{database}.sql"
//! compress = true
//! ```
//!
//! # Environment Variables
//!
//! `${VAR_NAME}` placeholders are substituted before parsing, and `DBMASK_<SECTION>_<KEY>`
//! variables override parsed values. The transformer secret is read from
//! `ANONYMIZATION_SECRET` at run time and is never part of the file.

pub mod loader;
pub mod rules;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, split_list, SECRET_ENV_VAR};
pub use rules::{
    load_rules, parse_rules, validate_rules, AnonymizationRuleSet, ColumnRule, DatabaseRules,
    RulesValidationReport, StrategyKind, TableRule, UnknownColumnPolicy,
};
pub use schema::{
    ApplicationConfig, DatabaseConfig, DbmaskConfig, LoggingConfig, OutputConfig, OutputMode, ResetMode,
    PerformanceConfig, SafetyConfig,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
