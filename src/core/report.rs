//! Run report
//!
//! The report holds identifiers, counts, durations and sanitized error text. It never holds
//! a column value. One report is written per run, on every exit path.
//!
//! # Lifecycle
//!
//! 1. [`RunReport::new`] stamps an execution id and the start time, status `RUNNING`
//! 2. Each finished table is appended with [`RunReport::add_table`]
//! 3. [`RunReport::finish`] or [`RunReport::fail`] sets the final status and duration
//! 4. [`RunReport::write_to_dir`] stores `run-report-<execution id>.json`
//!
//! # Example
//!
//! ```rust
//! use dbmask::core::{RunReport, RunStatus, TableReport};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut report = RunReport::new();
//! report.add_table(TableReport {
//!     table_name: "app.users".to_string(),
//!     rows_processed: 42,
//!     ..TableReport::default()
//! });
//! report.finish(RunStatus::Success);
//!
//! let path = report.write_to_dir(dir.path()).unwrap();
//! assert!(path.ends_with(report.file_name()));
//! assert_eq!(report.total_rows_processed(), 42);
//! ```

use crate::anonymization::StrategyTally;
use crate::core::sanitizer::sanitize_error;
use crate::domain::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Report created, run not finished
    Running,
    Success,
    Failed,
    /// Preflight passed and `--dry-run` stopped the run there
    DryRunSuccess,
}

/// Metrics for one table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableReport {
    /// `database.table`
    pub table_name: String,
    pub rows_processed: u64,
    pub duration_ms: u64,
    /// Columns with a rule, whether or not any value changed
    pub columns_anonymized: usize,
    /// Values transformed, per strategy
    pub strategy_counts: StrategyTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// PII-free execution report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// `YYYYMMDD-HHMMSS-<8 hex>`, also used in the file name
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    pub status: RunStatus,
    /// Fingerprint of the configuration file, see [`file_hash`]
    pub config_hash: String,
    pub rules_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<String>,
    pub tool_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub tables: Vec<TableReport>,
    /// Sanitized messages keyed by context, e.g. `app.users`
    pub errors: BTreeMap<String, String>,
}

impl RunReport {
    /// Start a report with a fresh execution id
    pub fn new() -> Self {
        Self::with_execution_id(new_execution_id())
    }

    /// Start a report with a caller-chosen execution id
    pub fn with_execution_id(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            end_time: None,
            total_duration_ms: None,
            status: RunStatus::Running,
            config_hash: UNKNOWN_HASH.to_string(),
            rules_hash: UNKNOWN_HASH.to_string(),
            rules_version: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            error_message: None,
            tables: Vec::new(),
            errors: BTreeMap::new(),
        }
    }

    /// Record a completed table
    pub fn add_table(&mut self, table: TableReport) {
        self.tables.push(table);
    }

    /// Record an error; the message is sanitized here
    pub fn add_error(&mut self, context: impl Into<String>, message: &str) {
        self.errors.insert(context.into(), sanitize_error(message));
    }

    /// Mark the run finished with `status`
    pub fn finish(&mut self, status: RunStatus) {
        let end = Utc::now();
        self.status = status;
        self.total_duration_ms = Some(
            u64::try_from((end - self.start_time).num_milliseconds()).unwrap_or_default(),
        );
        self.end_time = Some(end);
    }

    /// Mark the run failed with a sanitized top-level message
    pub fn fail(&mut self, message: &str) {
        self.error_message = Some(sanitize_error(message));
        self.finish(RunStatus::Failed);
    }

    /// Rows across all tables
    pub fn total_rows_processed(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_processed).sum()
    }

    /// Report file name for this run
    pub fn file_name(&self) -> String {
        format!("run-report-{}.json", self.execution_id)
    }

    /// Write the report as pretty JSON into `dir`, creating it if needed
    ///
    /// # Returns
    ///
    /// The path of the written file
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot be written.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        tracing::info!(path = %path.display(), "Run report written");
        Ok(path)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

const UNKNOWN_HASH: &str = "unknown";

/// `YYYYMMDD-HHMMSS-<8 hex>`
pub fn new_execution_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &simple[..8])
}

/// First 16 hex characters of the SHA-256 of a file, or `unknown`
///
/// An unreadable file is logged at warn level and never fails the run.
///
/// ```rust
/// use dbmask::core::report::file_hash;
///
/// assert_eq!(file_hash("/nonexistent/dbmask.toml"), "unknown");
/// ```
pub fn file_hash(path: impl AsRef<Path>) -> String {
    match fs::read(path.as_ref()) {
        Ok(bytes) => {
            let digest = Sha256::digest(&bytes);
            digest
                .iter()
                .take(8)
                .map(|b| format!("{b:02x}"))
                .collect()
        }
        Err(e) => {
            tracing::warn!(path = %path.as_ref().display(), error = %e, "Could not hash file");
            UNKNOWN_HASH.to_string()
        }
    }
}
