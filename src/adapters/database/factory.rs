//! Source and sink factories
//!
//! Picks the concrete implementations behind the pipeline traits from configuration.

use crate::adapters::database::traits::{SinkFactory, SourceDatabase};
use crate::adapters::dump::DumpSinkFactory;
use crate::adapters::postgresql::restore::{RestoreOptions, RestoreSinkFactory};
use crate::adapters::postgresql::PostgresSource;
use crate::config::schema::{DbmaskConfig, OutputMode};
use crate::domain::{DbmaskError, Result};
use std::sync::Arc;

/// Create the source reader for the configured source server
pub fn create_source(config: &DbmaskConfig) -> Arc<dyn SourceDatabase> {
    tracing::info!(
        host = %config.source.host,
        port = config.source.port,
        "Creating PostgreSQL source"
    );
    Arc::new(PostgresSource::new(config.source.clone()))
}

/// Create the sink factory for the configured output mode
///
/// # Errors
///
/// Returns [`DbmaskError::Configuration`] if restore mode has no target.
pub fn create_sink_factory(config: &DbmaskConfig) -> Result<Arc<dyn SinkFactory>> {
    match config.output.mode {
        OutputMode::Dump => {
            tracing::info!(path = %config.output.path, compress = config.output.compress, "Creating SQL dump output");
            Ok(Arc::new(DumpSinkFactory::new(config.output.clone())))
        }
        OutputMode::Restore => {
            let target = config.target.as_ref().ok_or_else(|| {
                DbmaskError::Configuration("[target] is required for restore mode".to_string())
            })?;

            tracing::info!(host = %target.host, port = target.port, "Creating direct restore output");
            Ok(Arc::new(RestoreSinkFactory::new(
                target.clone(),
                RestoreOptions {
                    batch_size: config.performance.batch_size,
                    reset_target: config.output.reset_target,
                    disable_integrity_checks: config.output.disable_integrity_checks,
                },
            )))
        }
    }
}
