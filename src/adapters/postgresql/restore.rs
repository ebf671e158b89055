//! Direct restore into a target PostgreSQL database
//!
//! The writer owns one connection and keeps one explicit transaction open for its whole
//! life. Rows are committed every `batch_size` rows; the tail is committed only when the
//! writer was marked successful, otherwise it is rolled back on close.
//!
//! Statements go through [`RestoreConnection`] so the transaction protocol can be driven
//! without a live server.

use crate::adapters::database::traits::{BatchSink, SinkFactory, SinkSummary};
use crate::adapters::postgresql::client::{format_pg_error, PostgresClient};
use crate::config::schema::{DatabaseConfig, ResetMode};
use crate::domain::{DbmaskError, Result, RowBatch, RowRecord, SqlIdentifier, Value};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// PostgreSQL's limit on bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Base tables of the session's schema, in a stable order
const LIST_TARGET_TABLES: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
     ORDER BY table_name";

const RESET_SAVEPOINT: &str = "reset_target";

static NULL_VALUE: Value = Value::Null;

/// Restore behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    pub batch_size: usize,
    pub reset_target: ResetMode,
    pub disable_integrity_checks: bool,
}

/// The statements a restore session needs from its connection
#[async_trait]
pub trait RestoreConnection: Send + Sync {
    /// Run one or more statements without parameters
    async fn batch_execute(&self, sql: &str) -> Result<()>;

    /// Run one parameterized statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64>;

    /// Run a query whose first column is text
    async fn query_strings(&self, sql: &str) -> Result<Vec<String>>;

    /// Drop the connection without handing it back for reuse
    fn discard(self: Box<Self>);
}

/// A pooled connection detached from reuse on [`RestoreConnection::discard`]
pub struct PooledConnection {
    object: deadpool_postgres::Object,
    // Keeps the pool alive while the writer holds its connection
    _client: Arc<PostgresClient>,
}

impl PooledConnection {
    /// Check a connection out of `client`'s pool
    pub async fn checkout(client: Arc<PostgresClient>) -> Result<Self> {
        let object = client.get_connection().await?;
        Ok(Self {
            object,
            _client: client,
        })
    }
}

#[async_trait]
impl RestoreConnection for PooledConnection {
    async fn batch_execute(&self, sql: &str) -> Result<()> {
        self.object
            .batch_execute(sql)
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
        self.object
            .execute(sql, params)
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))
    }

    async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        let rows = self
            .object
            .query(sql, &[])
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map_err(|e| DbmaskError::Database(format_pg_error(&e)))
            })
            .collect()
    }

    fn discard(self: Box<Self>) {
        let this = *self;
        drop(deadpool_postgres::Object::take(this.object));
    }
}

/// Writes anonymized pages straight into the target database
pub struct DirectRestoreWriter {
    connection: Option<Box<dyn RestoreConnection>>,
    destination: String,
    options: RestoreOptions,
    pending: usize,
    success: bool,
    summary: SinkSummary,
}

impl DirectRestoreWriter {
    /// Take a connection from `client` and open the writer's transaction
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained or the session cannot be set up.
    pub async fn open(client: Arc<PostgresClient>, options: RestoreOptions) -> Result<Self> {
        let destination = client.describe();
        let connection = PooledConnection::checkout(client).await?;
        Self::start(Box::new(connection), destination, options).await
    }

    /// Open the writer's transaction on an existing connection
    ///
    /// With `disable_integrity_checks` the session switches to
    /// `session_replication_role = replica` before `BEGIN`. A connection whose setup
    /// fails is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be set up.
    pub async fn start(
        connection: Box<dyn RestoreConnection>,
        destination: impl Into<String>,
        options: RestoreOptions,
    ) -> Result<Self> {
        let destination = destination.into();

        if let Err(e) = begin_session(connection.as_ref(), &options).await {
            connection.discard();
            return Err(e);
        }

        tracing::info!(
            destination = %destination,
            batch_size = options.batch_size,
            reset_target = %options.reset_target,
            "Direct restore writer initialized"
        );

        Ok(Self {
            connection: Some(connection),
            destination,
            options,
            pending: 0,
            success: false,
            summary: SinkSummary::default(),
        })
    }

    fn connection(&self) -> Result<&dyn RestoreConnection> {
        self.connection
            .as_deref()
            .ok_or_else(|| DbmaskError::Database("restore writer is already closed".to_string()))
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.connection()?.batch_execute(sql).await
    }

    async fn commit_and_begin(&mut self) -> Result<()> {
        self.execute("COMMIT").await?;
        self.execute("BEGIN").await?;
        self.pending = 0;
        Ok(())
    }

    /// Empty every base table of the target schema and commit
    ///
    /// `Truncate` issues one `TRUNCATE .. CASCADE` inside a savepoint. When the server
    /// refuses it the savepoint is rolled back and the writer falls back to `Delete`,
    /// which runs `DELETE FROM` per table with `session_replication_role = replica` set
    /// for the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the tables cannot be listed, a table name is not a plain
    /// identifier, or the delete fallback fails.
    pub async fn reset_target(&mut self) -> Result<()> {
        let mode = self.options.reset_target;
        if mode == ResetMode::None {
            return Ok(());
        }

        let tables = self
            .connection()?
            .query_strings(LIST_TARGET_TABLES)
            .await?
            .into_iter()
            .map(|name| {
                SqlIdentifier::new(name).map_err(|e| {
                    DbmaskError::Database(format!("Cannot reset target schema: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if tables.is_empty() {
            tracing::info!(destination = %self.destination, "Target schema has no tables to reset");
            return Ok(());
        }

        let truncated = mode == ResetMode::Truncate && self.try_truncate(&tables).await?;
        if !truncated {
            self.delete_all(&tables).await?;
        }
        self.commit_and_begin().await?;

        tracing::info!(
            destination = %self.destination,
            tables = tables.len(),
            method = if truncated { "truncate" } else { "delete" },
            "Reset target schema"
        );
        Ok(())
    }

    /// Ok(false) when the server refused the truncate
    async fn try_truncate(&self, tables: &[SqlIdentifier]) -> Result<bool> {
        let list = tables
            .iter()
            .map(SqlIdentifier::quoted)
            .collect::<Vec<_>>()
            .join(", ");

        self.execute(&format!("SAVEPOINT {RESET_SAVEPOINT}")).await?;
        match self.execute(&format!("TRUNCATE TABLE {list} CASCADE")).await {
            Ok(()) => {
                self.execute(&format!("RELEASE SAVEPOINT {RESET_SAVEPOINT}"))
                    .await?;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    destination = %self.destination,
                    error = %e,
                    "TRUNCATE refused on target; falling back to DELETE"
                );
                self.execute(&format!("ROLLBACK TO SAVEPOINT {RESET_SAVEPOINT}"))
                    .await?;
                Ok(false)
            }
        }
    }

    async fn delete_all(&self, tables: &[SqlIdentifier]) -> Result<()> {
        self.execute("SET LOCAL session_replication_role = replica")
            .await?;
        for table in tables {
            self.execute(&format!("DELETE FROM {}", table.quoted()))
                .await?;
        }
        Ok(())
    }

    async fn insert_chunk(
        &self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &[RowRecord],
    ) -> Result<u64> {
        let sql = insert_sql(table, columns, rows.len());
        let params: Vec<&(dyn ToSql + Sync)> = rows
            .iter()
            .flat_map(|row| {
                columns.iter().map(move |c| -> &(dyn ToSql + Sync) {
                    row.get(c.as_str()).unwrap_or(&NULL_VALUE)
                })
            })
            .collect();

        self.connection()?.execute(&sql, &params).await
    }
}

async fn begin_session(connection: &dyn RestoreConnection, options: &RestoreOptions) -> Result<()> {
    if options.disable_integrity_checks {
        connection
            .batch_execute("SET session_replication_role = replica")
            .await
            .map_err(|e| match e {
                DbmaskError::Database(msg) => DbmaskError::Database(format!(
                    "Failed to disable integrity checks (requires elevated privileges): {msg}"
                )),
                other => other,
            })?;
    }
    connection.batch_execute("BEGIN").await
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2), ($3, $4)`
fn insert_sql(table: &SqlIdentifier, columns: &[SqlIdentifier], rows: usize) -> String {
    let column_list = columns
        .iter()
        .map(SqlIdentifier::quoted)
        .collect::<Vec<_>>()
        .join(", ");

    let width = columns.len();
    let tuples = (0..rows)
        .map(|r| {
            let placeholders = (1..=width)
                .map(|c| format!("${}", r * width + c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({column_list}) VALUES {tuples}",
        table.quoted()
    )
}

/// Rows per statement for `columns` columns
fn rows_per_statement(batch_size: usize, columns: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / columns.max(1);
    batch_size.min(by_params).max(1)
}

#[async_trait]
impl BatchSink for DirectRestoreWriter {
    fn describe(&self) -> String {
        format!("postgresql://{}", self.destination)
    }

    async fn prepare(&mut self, _tables: &[SqlIdentifier]) -> Result<()> {
        self.reset_target().await
    }

    async fn write_batch(
        &mut self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &RowBatch,
    ) -> Result<()> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(());
        }

        let batch_size = self.options.batch_size.max(1);
        let chunk_rows = rows_per_statement(batch_size, columns.len());
        let mut remaining = rows.rows();

        // A chunk never crosses a commit boundary, so commits land every batch_size rows
        // even when pages and batches are misaligned.
        while !remaining.is_empty() {
            let room = batch_size.saturating_sub(self.pending).max(1);
            let (chunk, rest) = remaining.split_at(chunk_rows.min(room).min(remaining.len()));

            self.insert_chunk(table, columns, chunk).await?;
            self.pending += chunk.len();
            self.summary.rows_written += chunk.len() as u64;

            if self.pending >= batch_size {
                self.commit_and_begin().await?;
            }
            remaining = rest;
        }

        self.summary.batches_written += 1;
        tracing::debug!(table = %table, rows = rows.len(), "Inserted batch");
        Ok(())
    }

    fn mark_success(&mut self) {
        self.success = true;
    }

    async fn close(&mut self) -> Result<SinkSummary> {
        let Some(connection) = self.connection.take() else {
            return Ok(self.summary);
        };

        let finish = if self.success { "COMMIT" } else { "ROLLBACK" };
        let result = connection.batch_execute(finish).await;

        if self.options.disable_integrity_checks {
            if let Err(e) = connection
                .batch_execute("SET session_replication_role = DEFAULT")
                .await
            {
                tracing::warn!(error = %e, "Failed to reset session_replication_role");
            }
        }

        match result {
            Ok(()) if self.success => {
                tracing::info!(
                    destination = %self.destination,
                    rows = self.summary.rows_written,
                    "Direct restore committed"
                );
                Ok(self.summary)
            }
            Ok(()) => {
                tracing::warn!(
                    destination = %self.destination,
                    "Direct restore rolled back due to incomplete run"
                );
                Ok(self.summary)
            }
            Err(e) => {
                // The session state is unknown; keep it out of the pool.
                connection.discard();
                Err(DbmaskError::Database(format!("{finish} failed: {e}")))
            }
        }
    }
}

impl Drop for DirectRestoreWriter {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::warn!(
                destination = %self.destination,
                "Restore writer dropped without close; discarding connection to abort the transaction"
            );
            connection.discard();
        }
    }
}

/// Opens a [`DirectRestoreWriter`] per database on the target server
pub struct RestoreSinkFactory {
    config: DatabaseConfig,
    options: RestoreOptions,
}

impl RestoreSinkFactory {
    pub fn new(config: DatabaseConfig, options: RestoreOptions) -> Self {
        Self { config, options }
    }
}

#[async_trait]
impl SinkFactory for RestoreSinkFactory {
    async fn open(&self, database: &str) -> Result<Box<dyn BatchSink>> {
        let client = Arc::new(PostgresClient::new(&self.config, database)?);
        let writer = DirectRestoreWriter::open(client, self.options).await?;
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type StatementLog = Arc<Mutex<Vec<(String, usize)>>>;

    /// Records every statement; statements starting with `fail_on` are refused
    #[derive(Clone, Default)]
    struct Recorder {
        log: StatementLog,
        tables: Vec<String>,
        fail_on: Option<&'static str>,
        discarded: Arc<AtomicBool>,
    }

    impl Recorder {
        fn with_tables(tables: &[&str]) -> Self {
            Self {
                tables: tables.iter().map(|t| t.to_string()).collect(),
                ..Self::default()
            }
        }

        fn failing_on(mut self, prefix: &'static str) -> Self {
            self.fail_on = Some(prefix);
            self
        }

        fn record(&self, sql: &str, params: usize) -> Result<()> {
            self.log.lock().unwrap().push((sql.to_string(), params));
            match self.fail_on {
                Some(prefix) if sql.starts_with(prefix) => Err(DbmaskError::Database(
                    "permission denied for table accounts".to_string(),
                )),
                _ => Ok(()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }

        /// First keyword of each statement
        fn verbs(&self) -> Vec<String> {
            self.statements()
                .iter()
                .map(|s| s.split_whitespace().next().unwrap_or_default().to_string())
                .collect()
        }

        fn insert_params(&self) -> Vec<usize> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(sql, _)| sql.starts_with("INSERT"))
                .map(|(_, params)| *params)
                .collect()
        }

        fn was_discarded(&self) -> bool {
            self.discarded.load(Ordering::SeqCst)
        }
    }

    struct RecordingConnection(Recorder);

    #[async_trait]
    impl RestoreConnection for RecordingConnection {
        async fn batch_execute(&self, sql: &str) -> Result<()> {
            self.0.record(sql, 0)
        }

        async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64> {
            self.0.record(sql, params.len())?;
            Ok(params.len() as u64)
        }

        async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
            self.0.record(sql, 0)?;
            Ok(self.0.tables.clone())
        }

        fn discard(self: Box<Self>) {
            self.0.discarded.store(true, Ordering::SeqCst);
        }
    }

    fn id(s: &str) -> SqlIdentifier {
        SqlIdentifier::new(s).unwrap()
    }

    fn options(batch_size: usize, reset_target: ResetMode) -> RestoreOptions {
        RestoreOptions {
            batch_size,
            reset_target,
            disable_integrity_checks: false,
        }
    }

    fn page(ids: std::ops::Range<i64>) -> RowBatch {
        ids.map(|i| RowRecord::new().with("id", i))
            .collect::<Vec<_>>()
            .into()
    }

    async fn writer(recorder: &Recorder, options: RestoreOptions) -> DirectRestoreWriter {
        DirectRestoreWriter::start(
            Box::new(RecordingConnection(recorder.clone())),
            "target:5432/app",
            options,
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_insert_sql() {
        let sql = insert_sql(&id("users"), &[id("id"), id("name")], 2);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_rows_per_statement_respects_param_limit() {
        assert_eq!(rows_per_statement(1000, 3), 1000);
        assert_eq!(rows_per_statement(100_000, 10), 6553);
        assert_eq!(rows_per_statement(100_000, 70_000), 1);
    }

    #[tokio::test]
    async fn test_commits_every_batch_size_rows() {
        let recorder = Recorder::default();
        let mut sink = writer(&recorder, options(2, ResetMode::None)).await;

        sink.write_batch(&id("users"), &[id("id")], &page(0..3))
            .await
            .unwrap();
        sink.write_batch(&id("users"), &[id("id")], &page(3..4))
            .await
            .unwrap();
        sink.mark_success();
        let summary = sink.close().await.unwrap();

        assert_eq!(
            recorder.verbs(),
            vec![
                "BEGIN", "INSERT", "COMMIT", "BEGIN", "INSERT", "INSERT", "COMMIT", "BEGIN",
                "COMMIT"
            ]
        );
        assert_eq!(recorder.insert_params(), vec![2, 1, 1]);
        assert_eq!(summary.rows_written, 4);
        assert_eq!(summary.batches_written, 2);
        assert!(!recorder.was_discarded());
    }

    #[tokio::test]
    async fn test_pending_rows_carry_across_pages() {
        let recorder = Recorder::default();
        let mut sink = writer(&recorder, options(5, ResetMode::None)).await;

        sink.write_batch(&id("users"), &[id("id")], &page(0..3))
            .await
            .unwrap();
        sink.write_batch(&id("users"), &[id("id")], &page(3..6))
            .await
            .unwrap();

        assert_eq!(recorder.insert_params(), vec![3, 2, 1]);
        assert_eq!(
            recorder.verbs(),
            vec!["BEGIN", "INSERT", "INSERT", "COMMIT", "BEGIN", "INSERT"]
        );
        sink.mark_success();
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsuccessful_close_rolls_back() {
        let recorder = Recorder::default();
        let mut sink = writer(&recorder, options(10, ResetMode::None)).await;

        sink.write_batch(&id("users"), &[id("id")], &page(0..3))
            .await
            .unwrap();
        let summary = sink.close().await.unwrap();

        assert_eq!(recorder.verbs(), vec!["BEGIN", "INSERT", "ROLLBACK"]);
        assert_eq!(summary.rows_written, 3);
        assert!(!recorder.was_discarded());
    }

    #[tokio::test]
    async fn test_integrity_checks_toggle_around_session() {
        let recorder = Recorder::default();
        let mut sink = writer(
            &recorder,
            RestoreOptions {
                disable_integrity_checks: true,
                ..options(10, ResetMode::None)
            },
        )
        .await;

        sink.mark_success();
        sink.close().await.unwrap();

        assert_eq!(
            recorder.statements(),
            vec![
                "SET session_replication_role = replica",
                "BEGIN",
                "COMMIT",
                "SET session_replication_role = DEFAULT"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_discards_connection() {
        let recorder = Recorder::default().failing_on("COMMIT");
        let mut sink = writer(&recorder, options(10, ResetMode::None)).await;

        sink.mark_success();
        let err = sink.close().await.unwrap_err();

        assert!(err.to_string().contains("COMMIT failed"));
        assert!(recorder.was_discarded());
    }

    #[tokio::test]
    async fn test_failed_begin_discards_connection() {
        let recorder = Recorder::default().failing_on("BEGIN");
        let result = DirectRestoreWriter::start(
            Box::new(RecordingConnection(recorder.clone())),
            "target:5432/app",
            options(10, ResetMode::None),
        )
        .await;

        assert!(result.is_err());
        assert!(recorder.was_discarded());
    }

    #[tokio::test]
    async fn test_drop_without_close_discards_connection() {
        let recorder = Recorder::default();
        let sink = writer(&recorder, options(10, ResetMode::None)).await;

        drop(sink);

        assert!(recorder.was_discarded());
        assert_eq!(recorder.verbs(), vec!["BEGIN"]);
    }

    #[tokio::test]
    async fn test_no_reset_leaves_target_alone() {
        let recorder = Recorder::with_tables(&["accounts"]);
        let mut sink = writer(&recorder, options(10, ResetMode::None)).await;

        sink.prepare(&[id("users")]).await.unwrap();

        assert_eq!(recorder.verbs(), vec!["BEGIN"]);
    }

    #[tokio::test]
    async fn test_truncate_resets_every_target_table() {
        let recorder = Recorder::with_tables(&["accounts", "audit_log", "users"]);
        let mut sink = writer(&recorder, options(10, ResetMode::Truncate)).await;

        sink.prepare(&[id("users")]).await.unwrap();

        assert_eq!(
            recorder.statements(),
            vec![
                "BEGIN".to_string(),
                LIST_TARGET_TABLES.to_string(),
                "SAVEPOINT reset_target".to_string(),
                "TRUNCATE TABLE \"accounts\", \"audit_log\", \"users\" CASCADE".to_string(),
                "RELEASE SAVEPOINT reset_target".to_string(),
                "COMMIT".to_string(),
                "BEGIN".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_truncate_falls_back_to_delete() {
        let recorder = Recorder::with_tables(&["accounts", "users"]).failing_on("TRUNCATE");
        let mut sink = writer(&recorder, options(10, ResetMode::Truncate)).await;

        sink.prepare(&[]).await.unwrap();

        assert_eq!(
            recorder.statements()[2..],
            [
                "SAVEPOINT reset_target",
                "TRUNCATE TABLE \"accounts\", \"users\" CASCADE",
                "ROLLBACK TO SAVEPOINT reset_target",
                "SET LOCAL session_replication_role = replica",
                "DELETE FROM \"accounts\"",
                "DELETE FROM \"users\"",
                "COMMIT",
                "BEGIN",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_mode_skips_truncate() {
        let recorder = Recorder::with_tables(&["users"]);
        let mut sink = writer(&recorder, options(10, ResetMode::Delete)).await;

        sink.prepare(&[]).await.unwrap();

        assert_eq!(
            recorder.statements()[2..],
            [
                "SET LOCAL session_replication_role = replica",
                "DELETE FROM \"users\"",
                "COMMIT",
                "BEGIN",
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_rejects_unquotable_table_name() {
        let recorder = Recorder::with_tables(&["users", "odd name; drop"]);
        let mut sink = writer(&recorder, options(10, ResetMode::Truncate)).await;

        let err = sink.prepare(&[]).await.unwrap_err();

        assert!(err.to_string().contains("Cannot reset target schema"));
        assert!(!recorder.verbs().contains(&"TRUNCATE".to_string()));
    }
}
