//! In-memory source and sink used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use dbmask::adapters::database::traits::{
    BatchSink, PageQuery, SinkFactory, SinkSummary, SourceColumn, SourceDatabase, TableReader,
};
use dbmask::config::rules::{parse_rules, AnonymizationRuleSet};
use dbmask::config::schema::DbmaskConfig;
use dbmask::config::{secret_string, SecretString};
use dbmask::domain::{DbmaskError, Result, RowBatch, RowRecord, SqlIdentifier, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "test-secret-key-32-characters-long-123456";

pub fn secret() -> SecretString {
    secret_string(SECRET.to_string())
}

pub fn rules(toml: &str) -> AnonymizationRuleSet {
    parse_rules(toml).unwrap()
}

/// Dump-mode config on a non-production host, reports under `report_dir`
pub fn config(report_dir: &Path, batch_size: usize) -> DbmaskConfig {
    config_with(report_dir, batch_size, "")
}

/// Same as [`config`] with extra TOML sections appended
pub fn config_with(report_dir: &Path, batch_size: usize, extra: &str) -> DbmaskConfig {
    let toml = format!(
        r#"
[source]
host = "replica.internal"
username = "reader"

[performance]
batch_size = {batch_size}

[logging]
local_enabled = false
report_path = "{}"

{extra}
"#,
        report_dir.display().to_string().replace('\\', "/")
    );
    toml::from_str(&toml).unwrap()
}

/// A table held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<SourceColumn>,
    pub rows: Vec<RowRecord>,
    /// Error returned by every page fetch
    pub fail_with: Option<String>,
}

impl MemoryTable {
    pub fn new(columns: &[&str], rows: Vec<RowRecord>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| SourceColumn::new(*c, "text", true))
                .collect(),
            rows,
            fail_with: None,
        }
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }
}

/// Keyset fetches seen by the source, as `(table, after, sql)`
pub type FetchLog = Arc<Mutex<Vec<(String, Option<i64>, String)>>>;

#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<(String, String), MemoryTable>,
    pub fetches: FetchLog,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, database: &str, table: &str, data: MemoryTable) -> Self {
        self.tables
            .insert((database.to_string(), table.to_string()), data);
        self
    }
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn open_table(
        &self,
        database: &str,
        table: &SqlIdentifier,
    ) -> Result<Box<dyn TableReader>> {
        let data = self
            .tables
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MemoryReader {
            table: table.to_string(),
            data,
            fetches: Arc::clone(&self.fetches),
        }))
    }
}

pub struct MemoryReader {
    table: String,
    data: MemoryTable,
    fetches: FetchLog,
}

impl MemoryReader {
    pub fn new(table: &str, data: MemoryTable) -> Self {
        Self {
            table: table.to_string(),
            data,
            fetches: FetchLog::default(),
        }
    }

    pub fn fetches(&self) -> FetchLog {
        Arc::clone(&self.fetches)
    }
}

#[async_trait]
impl TableReader for MemoryReader {
    async fn columns(&mut self) -> Result<Vec<SourceColumn>> {
        Ok(self.data.columns.clone())
    }

    async fn fetch_page(&mut self, query: &PageQuery, after: Option<i64>) -> Result<RowBatch> {
        self.fetches
            .lock()
            .unwrap()
            .push((self.table.clone(), after, query.to_sql(after)));

        if let Some(message) = &self.data.fail_with {
            return Err(DbmaskError::Database(message.clone()));
        }

        let key = query.key.as_str();
        let mut rows: Vec<&RowRecord> = self
            .data
            .rows
            .iter()
            .filter(|r| matches!(r.get(key), Some(Value::Int(k)) if after.map_or(true, |a| *k > a)))
            .collect();
        rows.sort_by_key(|r| r.get(key).and_then(Value::as_i64));

        let page = rows
            .into_iter()
            .take(query.limit)
            .map(|row| {
                query.columns.iter().fold(RowRecord::new(), |out, c| {
                    match row.get(c.name.as_str()) {
                        Some(v) => out.with(c.name.as_str(), v.clone()),
                        None => out,
                    }
                })
            })
            .collect::<Vec<_>>();
        Ok(RowBatch::from(page))
    }
}

/// What a [`MemorySink`] received
#[derive(Debug, Default)]
pub struct SinkLog {
    pub prepared: Vec<String>,
    pub batches: Vec<(String, Vec<String>, RowBatch)>,
    pub success: bool,
    pub closed: bool,
}

impl SinkLog {
    pub fn rows(&self, table: &str) -> Vec<RowRecord> {
        self.batches
            .iter()
            .filter(|(t, _, _)| t == table)
            .flat_map(|(_, _, batch)| batch.rows().to_vec())
            .collect()
    }
}

pub type SharedSinkLog = Arc<Mutex<SinkLog>>;

#[derive(Default)]
pub struct MemorySinkFactory {
    pub logs: Arc<Mutex<HashMap<String, SharedSinkLog>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, database: &str) -> SharedSinkLog {
        Arc::clone(&self.logs.lock().unwrap()[database])
    }

    pub fn opened(&self) -> usize {
        self.logs.lock().unwrap().len()
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn open(&self, database: &str) -> Result<Box<dyn BatchSink>> {
        let log = SharedSinkLog::default();
        self.logs
            .lock()
            .unwrap()
            .insert(database.to_string(), Arc::clone(&log));
        Ok(Box::new(MemorySink { log }))
    }
}

pub struct MemorySink {
    log: SharedSinkLog,
}

#[async_trait]
impl BatchSink for MemorySink {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn prepare(&mut self, tables: &[SqlIdentifier]) -> Result<()> {
        self.log.lock().unwrap().prepared = tables.iter().map(ToString::to_string).collect();
        Ok(())
    }

    async fn write_batch(
        &mut self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &RowBatch,
    ) -> Result<()> {
        self.log.lock().unwrap().batches.push((
            table.to_string(),
            columns.iter().map(ToString::to_string).collect(),
            rows.clone(),
        ));
        Ok(())
    }

    fn mark_success(&mut self) {
        self.log.lock().unwrap().success = true;
    }

    async fn close(&mut self) -> Result<SinkSummary> {
        let mut log = self.log.lock().unwrap();
        log.closed = true;
        Ok(SinkSummary {
            batches_written: log.batches.len() as u64,
            rows_written: log.batches.iter().map(|(_, _, b)| b.len() as u64).sum(),
        })
    }
}
