//! Pipeline orchestrator
//!
//! Sequences a run: preflight (configuration, rules, safety gate), then for every database
//! in the rule set one sink, and for every table one keyset scan whose pages go through the
//! rule engine into the sink. Tables run one after another; a page is anonymized and written
//! before the next one is fetched.
//!
//! The first table error aborts the run. The sink is still closed (unsuccessfully) and the
//! run report is written before the error is returned.

use crate::adapters::database::traits::{BatchSink, SinkFactory, SourceDatabase};
use crate::adapters::database::{create_sink_factory, create_source};
use crate::anonymization::{
    AnonymizationEngine, CompiledRuleSet, CompiledTable, DeterministicTransformer, StrategyTally,
};
use crate::config::rules::{AnonymizationRuleSet, UnknownColumnPolicy};
use crate::config::schema::{DbmaskConfig, OutputMode, DATABASE_PLACEHOLDER};
use crate::config::SecretString;
use crate::core::paginator::{BatchHandler, KeysetPaginator};
use crate::core::report::{file_hash, RunReport, RunStatus, TableReport};
use crate::core::sanitizer::sanitize_error;
use crate::domain::{DbmaskError, Result, RowBatch, SqlIdentifier};
use crate::safety::SafetyGate;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Per-run inputs that do not come from the configuration file
#[derive(Default)]
pub struct RunOptions {
    /// Token passed on the command line, compared against `safety.approval_flag`
    pub approval: Option<String>,

    /// Stop after preflight
    pub dry_run: bool,

    /// Transformer key
    pub secret: Option<SecretString>,
}

/// Result of a run, with the report that was produced for it
pub struct RunOutcome {
    pub report: RunReport,
    /// Where the report landed; `None` if writing it failed
    pub report_path: Option<PathBuf>,
    pub result: Result<()>,
}

impl RunOutcome {
    /// Report a run that failed before an [`Orchestrator`] existed
    ///
    /// Configuration, rules and output setup happen before the pipeline is built. When one
    /// of them fails, this still produces the run's single report, marked `FAILED` with the
    /// sanitized error, and writes it into `report_dir`.
    ///
    /// # Arguments
    ///
    /// * `report_dir` - `logging.report_path` when the configuration loaded, otherwise
    ///   [`DEFAULT_REPORT_PATH`](crate::config::schema::DEFAULT_REPORT_PATH)
    /// * `config_path` / `rules_path` - files to fingerprint, when known
    /// * `error` - the setup error; it becomes the outcome's result
    pub fn setup_failure(
        report_dir: impl AsRef<Path>,
        config_path: Option<&Path>,
        rules_path: Option<&Path>,
        error: DbmaskError,
    ) -> Self {
        let mut report = RunReport::new();
        if let Some(path) = config_path {
            report.config_hash = file_hash(path);
        }
        if let Some(path) = rules_path {
            report.rules_hash = file_hash(path);
        }

        let message = sanitize_error(&error.to_string());
        tracing::error!(execution_id = %report.execution_id, error = %message, "Run setup failed");
        report.fail(&message);

        let report_path = match report.write_to_dir(report_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Failed to write run report");
                None
            }
        };

        Self {
            report,
            report_path,
            result: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Process exit code for this outcome
    ///
    /// `0` on success, otherwise [`DbmaskError::exit_code`]: `2` for configuration, rules
    /// and validation errors, `3` for a safety denial, `4` for connection failures and `1`
    /// for anything else.
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(()) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

/// Drives one anonymization run
///
/// # Example
///
/// ```no_run
/// use dbmask::config::{load_config, load_rules};
/// use dbmask::core::{Orchestrator, RunOptions};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = load_config("dbmask.toml")?;
/// let rules = load_rules(&config.rules_file)?;
///
/// let orchestrator = Orchestrator::from_config(config, rules)?;
/// let outcome = orchestrator
///     .run(&RunOptions {
///         dry_run: true,
///         ..RunOptions::default()
///     })
///     .await;
///
/// println!("report: {:?}", outcome.report_path);
/// std::process::exit(outcome.exit_code());
/// # }
/// ```
pub struct Orchestrator {
    config: DbmaskConfig,
    rules: AnonymizationRuleSet,
    source: Arc<dyn SourceDatabase>,
    sinks: Arc<dyn SinkFactory>,
    config_hash: Option<String>,
    rules_hash: Option<String>,
}

impl Orchestrator {
    /// Build an orchestrator over explicit source and sink implementations
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `rules` - Rule set; its databases and tables define what is scanned
    /// * `source` - Opens a reader per source database
    /// * `sinks` - Opens one sink per database for the run's output
    pub fn new(
        config: DbmaskConfig,
        rules: AnonymizationRuleSet,
        source: Arc<dyn SourceDatabase>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            config,
            rules,
            source,
            sinks,
            config_hash: None,
            rules_hash: None,
        }
    }

    /// Build an orchestrator over PostgreSQL and the configured output
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Configuration`] if the output cannot be set up.
    pub fn from_config(config: DbmaskConfig, rules: AnonymizationRuleSet) -> Result<Self> {
        let source = create_source(&config);
        let sinks = create_sink_factory(&config)?;
        Ok(Self::new(config, rules, source, sinks))
    }

    /// Record the hashes of the files the run was loaded from
    pub fn with_source_files(mut self, config_path: &Path, rules_path: &Path) -> Self {
        self.config_hash = Some(file_hash(config_path));
        self.rules_hash = Some(file_hash(rules_path));
        self
    }

    /// Run the pipeline and write the report
    ///
    /// Never returns early without a report: every outcome, including preflight failures,
    /// ends with the report flushed to `logging.report_path`.
    pub async fn run(&self, options: &RunOptions) -> RunOutcome {
        let mut report = RunReport::new();
        if let Some(hash) = &self.config_hash {
            report.config_hash = hash.clone();
        }
        if let Some(hash) = &self.rules_hash {
            report.rules_hash = hash.clone();
        }
        report.rules_version = self.rules.rules_version.clone();

        tracing::info!(
            execution_id = %report.execution_id,
            mode = %self.config.output.mode,
            tables = self.rules.table_count(),
            "Starting anonymization run"
        );

        let result = self.run_inner(options, &mut report).await;
        match &result {
            Ok(status) => report.finish(*status),
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                tracing::error!(execution_id = %report.execution_id, error = %message, "Run failed");
                report.fail(&message);
            }
        }

        let report_path = match report.write_to_dir(&self.config.logging.report_path) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Failed to write run report");
                None
            }
        };

        if result.is_ok() {
            tracing::info!(
                execution_id = %report.execution_id,
                status = ?report.status,
                rows = report.total_rows_processed(),
                duration_ms = report.total_duration_ms.unwrap_or_default(),
                "Anonymization run complete"
            );
        }

        RunOutcome {
            report,
            report_path,
            result: result.map(|_| ()),
        }
    }

    async fn run_inner(&self, options: &RunOptions, report: &mut RunReport) -> Result<RunStatus> {
        self.preflight(options.approval.as_deref())?;

        let rules = CompiledRuleSet::compile(&self.rules)?;

        if options.dry_run || self.config.application.dry_run {
            log_plan(&rules);
            tracing::info!("Dry run: configuration, rules and safety checks passed");
            return Ok(RunStatus::DryRunSuccess);
        }

        let secret = options.secret.as_ref().ok_or_else(|| {
            DbmaskError::Configuration(format!(
                "{} is not set",
                crate::config::SECRET_ENV_VAR
            ))
        })?;
        let transformer = DeterministicTransformer::new(secret.expose_secret().as_ref())?;
        let engine = AnonymizationEngine::new(transformer, rules);
        let paginator = KeysetPaginator::new(self.config.performance.batch_size)?;

        let databases: Vec<String> = engine.rules().databases().map(str::to_string).collect();
        for database in &databases {
            self.process_database(&engine, &paginator, database, report)
                .await?;
        }

        Ok(RunStatus::Success)
    }

    /// Validate configuration and rules, then run the safety gate for every connection
    ///
    /// # Errors
    ///
    /// Configuration and rule problems come back as [`DbmaskError::Configuration`] /
    /// [`DbmaskError::Rules`], gate denials as [`DbmaskError::Safety`].
    pub fn preflight(&self, approval: Option<&str>) -> Result<()> {
        self.config.validate().map_err(DbmaskError::Configuration)?;
        self.rules.validate_for_run().map_err(DbmaskError::Rules)?;

        if self.config.output.mode == OutputMode::Dump
            && self.rules.databases.len() > 1
            && !self.config.output.path.contains(DATABASE_PLACEHOLDER)
        {
            return Err(DbmaskError::Configuration(format!(
                "output.path must contain {DATABASE_PLACEHOLDER} when rules cover more than one database"
            )));
        }

        let gate = SafetyGate::new(&self.config.safety)?;
        for database in self.rules.databases.keys() {
            gate.ensure_safe_to_connect(&self.config.source.host, database, approval)?;
            if let (OutputMode::Restore, Some(target)) =
                (self.config.output.mode, self.config.target.as_ref())
            {
                gate.ensure_safe_to_connect(&target.host, database, approval)?;
            }
        }

        Ok(())
    }

    async fn process_database(
        &self,
        engine: &AnonymizationEngine,
        paginator: &KeysetPaginator,
        database: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut sink = self.sinks.open(database).await?;
        tracing::info!(database, sink = %sink.describe(), "Opened output");

        let result = self
            .process_tables(engine, paginator, database, sink.as_mut(), report)
            .await;

        if result.is_ok() {
            sink.mark_success();
        }

        match (result, sink.close().await) {
            (Ok(()), Ok(summary)) => {
                tracing::info!(
                    database,
                    batches = summary.batches_written,
                    rows = summary.rows_written,
                    "Closed output"
                );
                Ok(())
            }
            (Ok(()), Err(e)) => {
                report.add_error(database, &e.to_string());
                Err(e)
            }
            (Err(e), close) => {
                if let Err(close_err) = close {
                    tracing::warn!(
                        database,
                        error = %sanitize_error(&close_err.to_string()),
                        "Failed to close output after error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process_tables(
        &self,
        engine: &AnonymizationEngine,
        paginator: &KeysetPaginator,
        database: &str,
        sink: &mut dyn BatchSink,
        report: &mut RunReport,
    ) -> Result<()> {
        let tables: Vec<SqlIdentifier> = engine
            .rules()
            .tables(database)
            .map(|t| t.name.clone())
            .collect();
        sink.prepare(&tables).await?;

        for table in engine.rules().tables(database) {
            let started = Instant::now();
            let context = format!("{database}.{}", table.name);

            match self
                .process_table(engine, paginator, database, table, sink)
                .await
            {
                Ok((rows, tally)) => {
                    let duration_ms = elapsed_ms(started);
                    crate::log_table_complete!(context, rows, duration_ms);
                    report.add_table(TableReport {
                        table_name: context,
                        rows_processed: rows,
                        duration_ms,
                        columns_anonymized: table.anonymized_column_count(),
                        strategy_counts: tally,
                        error: None,
                    });
                }
                Err(e) => {
                    crate::log_error_with_context!(e, context);
                    let message = sanitize_error(&e.to_string());
                    report.add_table(TableReport {
                        table_name: context.clone(),
                        duration_ms: elapsed_ms(started),
                        columns_anonymized: table.anonymized_column_count(),
                        error: Some(message.clone()),
                        ..TableReport::default()
                    });
                    report.add_error(context, &message);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn process_table(
        &self,
        engine: &AnonymizationEngine,
        paginator: &KeysetPaginator,
        database: &str,
        table: &CompiledTable,
        sink: &mut dyn BatchSink,
    ) -> Result<(u64, StrategyTally)> {
        crate::log_table_start!(database, table.name);

        let mut reader = self.source.open_table(database, &table.name).await?;
        let source_columns = reader.columns().await?;
        if source_columns.is_empty() {
            return Err(DbmaskError::Validation(format!(
                "Table '{database}.{}' not found or has no columns",
                table.name
            )));
        }

        for column in &source_columns {
            let known = column.name == table.primary_key.as_str()
                || table.strategy_for(&column.name).is_some();
            if !known {
                unmapped_source_column(engine.rules().policy(), database, table, &column.name)?;
            }
        }

        for column in &table.columns {
            if !source_columns.iter().any(|c| c.name == column.name.as_str()) {
                tracing::warn!(
                    database,
                    table = %table.name,
                    column = %column.name,
                    "Configured column not present in source table"
                );
            }
        }

        let query = paginator.plan(&table.name, &table.primary_key, &source_columns)?;
        let columns = query.column_names();

        let mut handler = TableBatchHandler {
            engine,
            database,
            table: &table.name,
            columns: &columns,
            sink,
            tally: StrategyTally::new(),
        };
        let stats = paginator
            .stream_table(reader.as_mut(), query, &mut handler)
            .await?;

        Ok((stats.rows, handler.tally))
    }
}

/// Anonymizes each page and hands it to the sink
struct TableBatchHandler<'a> {
    engine: &'a AnonymizationEngine,
    database: &'a str,
    table: &'a SqlIdentifier,
    columns: &'a [SqlIdentifier],
    sink: &'a mut dyn BatchSink,
    tally: StrategyTally,
}

#[async_trait]
impl BatchHandler for TableBatchHandler<'_> {
    async fn handle(&mut self, mut batch: RowBatch) -> Result<()> {
        let tally = self
            .engine
            .anonymize_batch(self.database, self.table.as_str(), &mut batch)?;
        self.tally.merge(&tally);
        self.sink.write_batch(self.table, self.columns, &batch).await
    }
}

fn unmapped_source_column(
    policy: UnknownColumnPolicy,
    database: &str,
    table: &CompiledTable,
    column: &str,
) -> Result<()> {
    match policy {
        UnknownColumnPolicy::Fail => Err(DbmaskError::UnknownColumn {
            database: database.to_string(),
            table: table.name.to_string(),
            column: column.to_string(),
        }),
        UnknownColumnPolicy::Warn => {
            tracing::warn!(
                database,
                table = %table.name,
                column,
                "Source column has no rule; copying unchanged"
            );
            Ok(())
        }
        UnknownColumnPolicy::Preserve => Ok(()),
    }
}

fn log_plan(rules: &CompiledRuleSet) {
    for database in rules.databases() {
        for table in rules.tables(database) {
            tracing::info!(
                database,
                table = %table.name,
                primary_key = %table.primary_key,
                columns = table.columns.len(),
                anonymized = table.anonymized_column_count(),
                "Planned table"
            );
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
