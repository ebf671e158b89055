//! Structured logging setup using tracing
//!
//! Human-readable lines go to stderr. When `logging.local_enabled` is set, the same events
//! are also written as JSON to a rotating file under `logging.local_path`.
//!
//! Run reports are separate from these logs; see [`crate::core::report`].
//!
//! # Example
//!
//! ```no_run
//! use dbmask::logging::init_logging;
//! use dbmask::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("debug", &config).expect("Failed to initialize logging");
//! ```

use crate::config::LoggingConfig;
use crate::domain::{DbmaskError, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "dbmask.log";

/// Guard that must be kept alive for the duration of the program
///
/// Holds the non-blocking file writer. Dropping it flushes buffered lines, so bind it in
/// `main` rather than discarding it with `let _ =`.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            _file_guard: file_guard,
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG`, when set, overrides `log_level_str`.
///
/// # Arguments
///
/// * `log_level_str` - One of `trace`, `debug`, `info`, `warn`, `error` (any case)
/// * `config` - File logging switches: directory, rotation and whether it is enabled
///
/// # Returns
///
/// A [`LoggingGuard`] that must outlive every log call
///
/// # Example
///
/// ```no_run
/// use dbmask::config::LoggingConfig;
/// use dbmask::logging::init_logging;
///
/// let config = LoggingConfig {
///     local_enabled: false,
///     ..LoggingConfig::default()
/// };
/// let _guard = init_logging("info", &config)?;
/// tracing::info!("ready");
/// # Ok::<(), dbmask::domain::DbmaskError>(())
/// ```
///
/// # Errors
///
/// Returns [`DbmaskError::Configuration`] for an unknown level or an unusable log directory.
pub fn init_logging(log_level_str: &str, config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_level = parse_log_level(log_level_str)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dbmask={log_level}")));

    let mut layers = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    layers.push(console_layer.boxed());

    let file_guard = if config.local_enabled {
        std::fs::create_dir_all(&config.local_path).map_err(|e| {
            DbmaskError::Configuration(format!(
                "Failed to create log directory {}: {}",
                config.local_path, e
            ))
        })?;

        let file_appender = RollingFileAppender::new(
            parse_rotation(&config.local_rotation),
            &config.local_path,
            LOG_FILE_PREFIX,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_writer(non_blocking)
            .with_filter(env_filter);
        layers.push(file_layer.boxed());
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry().with(layers).try_init().map_err(|e| {
        DbmaskError::Configuration(format!("Failed to install log subscriber: {e}"))
    })?;

    tracing::debug!(
        local_enabled = config.local_enabled,
        local_path = %config.local_path,
        "Logging initialized"
    );

    Ok(LoggingGuard::new(file_guard))
}

/// Case-insensitive level name to [`Level`]
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(DbmaskError::Configuration(format!(
            "Invalid log level: {level_str}. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

/// `hourly`, `daily` or `never`; anything else rotates daily
fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}
