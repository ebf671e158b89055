// Dbmask - Deterministic Database Anonymization Tool
// Copyright (c) 2025 Dbmask Contributors
// Licensed under the MIT License

//! # Dbmask - Deterministic Database Anonymization
//!
//! Dbmask copies PostgreSQL databases into non-production environments with every
//! sensitive column anonymized. The same input and secret always produce the same output,
//! so joins across tables keep working without a stored mapping table.
//!
//! ## Overview
//!
//! - **Scanning** tables page by page with keyset pagination (no `OFFSET`)
//! - **Anonymizing** each page with keyed HMAC-SHA256 transforms driven by a rule file
//! - **Writing** the result to a replayable SQL dump or directly into a target database
//! - **Refusing** production-looking hosts through a fail-closed safety gate
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Pagination, orchestration, run report, error sanitizing
//! - [`anonymization`] - Transformer, compiled strategies, rule engine
//! - [`safety`] - Safety gate
//! - [`adapters`] - PostgreSQL source/restore and SQL dump output
//! - [`domain`] - Identifiers, row model, errors
//! - [`config`] - Configuration and rule files
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbmask::config::{load_config, load_rules, secret_string};
//! use dbmask::core::{Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("dbmask.toml")?;
//!     let rules = load_rules(&config.rules_file)?;
//!
//!     let orchestrator = Orchestrator::from_config(config, rules)?;
//!     let outcome = orchestrator
//!         .run(&RunOptions {
//!             secret: std::env::var("ANONYMIZATION_SECRET").ok().map(secret_string),
//!             ..RunOptions::default()
//!         })
//!         .await;
//!
//!     println!("Anonymized {} rows", outcome.report.total_rows_processed());
//!     Ok(())
//! }
//! ```
//!
//! ## Deterministic Transforms
//!
//! ```rust
//! use dbmask::anonymization::DeterministicTransformer;
//!
//! # fn example() -> dbmask::domain::Result<()> {
//! let transformer = DeterministicTransformer::new("a-secret-of-at-least-32-characters!!")?;
//! assert_eq!(transformer.hash_id("patient-42"), transformer.hash_id("patient-42"));
//! assert_eq!(transformer.mask_phone("9876543210"), "XXXXXX3210");
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`domain::Result`], backed by [`domain::DbmaskError`]. Errors
//! carry identifiers and counts; database messages pass through
//! [`core::sanitizer::sanitize_error`] before they are logged or reported.

pub mod adapters;
pub mod anonymization;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
pub mod safety;
