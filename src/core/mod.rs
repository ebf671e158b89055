//! Core pipeline for dbmask.
//!
//! # Modules
//!
//! - [`paginator`] - Keyset pagination over a [`TableReader`](crate::adapters::database::TableReader)
//! - [`orchestrator`] - Preflight, per-table streaming and report flushing
//! - [`report`] - PII-free run report
//! - [`sanitizer`] - Error message redaction
//!
//! # Run Workflow
//!
//! 1. **Preflight**: validate configuration and rules, run the safety gate
//! 2. **Compile**: resolve every column strategy once
//! 3. **Stream**: for each table, fetch a page by key, anonymize it, write it to the sink
//! 4. **Report**: write `run-report-<id>.json` whatever the outcome
//!
//! # Example
//!
//! ```rust,no_run
//! use dbmask::config::{load_config, load_rules};
//! use dbmask::core::orchestrator::{Orchestrator, RunOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("dbmask.toml")?;
//! let rules = load_rules(&config.rules_file)?;
//!
//! let orchestrator = Orchestrator::from_config(config, rules)?;
//! let outcome = orchestrator
//!     .run(&RunOptions {
//!         dry_run: true,
//!         ..RunOptions::default()
//!     })
//!     .await;
//!
//! println!("Status: {:?}", outcome.report.status);
//! # Ok(())
//! # }
//! ```

pub mod orchestrator;
pub mod paginator;
pub mod report;
pub mod sanitizer;

pub use orchestrator::{Orchestrator, RunOptions, RunOutcome};
pub use paginator::{BatchHandler, KeysetPaginator, KeysetScan, ScanStats};
pub use report::{RunReport, RunStatus, TableReport};
pub use sanitizer::sanitize_error;
