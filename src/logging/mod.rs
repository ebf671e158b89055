//! Logging
//!
//! Structured `tracing` output with:
//! - A human-readable console layer filtered by level or `RUST_LOG`
//! - An optional JSON file layer with daily or hourly rotation
//!
//! Log events carry identifiers and counts. Row values are never logged, and error text that
//! may echo values goes through [`sanitize_error`](crate::core::sanitizer::sanitize_error)
//! first.
//!
//! # Example
//!
//! ```no_run
//! use dbmask::logging::init_logging;
//! use dbmask::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(table = "users", rows = 1000, "Table complete");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of a table scan
///
/// # Example
///
/// ```no_run
/// use dbmask::log_table_start;
///
/// log_table_start!("app", "users");
/// ```
#[macro_export]
macro_rules! log_table_start {
    ($database:expr, $table:expr) => {
        tracing::info!(
            database = %$database,
            table = %$table,
            "Processing table"
        );
    };
}

/// Log a finished table scan
///
/// # Example
///
/// ```no_run
/// use dbmask::log_table_complete;
///
/// log_table_complete!("app.users", 2_000u64, 350u64);
/// ```
#[macro_export]
macro_rules! log_table_complete {
    ($table:expr, $rows:expr, $duration_ms:expr) => {
        tracing::info!(
            table = %$table,
            rows = $rows,
            duration_ms = $duration_ms,
            "Table complete"
        );
    };
}

/// Log an error after sanitizing its message
///
/// # Example
///
/// ```no_run
/// use dbmask::log_error_with_context;
/// use dbmask::domain::DbmaskError;
///
/// let error = DbmaskError::Database("failed at VALUES (1, 'x')".to_string());
/// log_error_with_context!(&error, "app.users");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$crate::core::sanitizer::sanitize_error(&$error.to_string()),
            context = %$context,
            "Error occurred"
        );
    };
}
