//! PostgreSQL source reader

use crate::adapters::database::traits::{PageQuery, SourceColumn, SourceDatabase, TableReader};
use crate::adapters::postgresql::client::{format_pg_error, PostgresClient};
use crate::adapters::postgresql::values::{is_integer_type, is_native_type};
use crate::config::schema::DatabaseConfig;
use crate::domain::{DbmaskError, Result, RowBatch, RowRecord, SqlIdentifier, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Statement;

/// Source server; one pool per database, built on first use
pub struct PostgresSource {
    config: DatabaseConfig,
    clients: Mutex<HashMap<String, Arc<PostgresClient>>>,
}

impl PostgresSource {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, database: &str) -> Result<Arc<PostgresClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(database) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(PostgresClient::new(&self.config, database)?);
        client.test_connection().await?;
        tracing::info!(
            source = %client.describe(),
            read_only = self.config.read_only,
            "Created source connection pool"
        );
        clients.insert(database.to_string(), Arc::clone(&client));
        Ok(client)
    }
}

#[async_trait]
impl SourceDatabase for PostgresSource {
    async fn open_table(
        &self,
        database: &str,
        table: &SqlIdentifier,
    ) -> Result<Box<dyn TableReader>> {
        let client = self.client(database).await?;
        let connection = client.get_connection().await?;
        Ok(Box::new(PostgresTableReader {
            connection,
            table: table.clone(),
            prepared: HashMap::new(),
        }))
    }
}

/// Reads one table over one pooled connection
///
/// A scan uses two statements, the unbounded first page and the seek page. Both are prepared
/// once and cached by their SQL text.
pub struct PostgresTableReader {
    connection: deadpool_postgres::Object,
    table: SqlIdentifier,
    prepared: HashMap<String, Statement>,
}

impl PostgresTableReader {
    async fn statement(&mut self, query: &PageQuery, after: Option<i64>) -> Result<Statement> {
        let sql = query.to_sql(after);
        if let Some(statement) = self.prepared.get(&sql) {
            return Ok(statement.clone());
        }

        let statement = self
            .connection
            .prepare(&sql)
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))?;

        let key_type = statement
            .columns()
            .iter()
            .find(|c| c.name() == query.key.as_str())
            .map(|c| c.type_().clone());
        match key_type {
            Some(ref ty) if is_integer_type(ty) => {}
            Some(ty) => {
                return Err(DbmaskError::Validation(format!(
                    "Primary key must be smallint, integer or bigint. Table: {}, Column: {}, Type: {}",
                    self.table,
                    query.key,
                    ty.name()
                )))
            }
            None => {
                return Err(DbmaskError::Validation(format!(
                    "Primary key column '{}' not projected for table '{}'",
                    query.key, self.table
                )))
            }
        }

        self.prepared.insert(sql, statement.clone());
        Ok(statement)
    }
}

#[async_trait]
impl TableReader for PostgresTableReader {
    async fn columns(&mut self) -> Result<Vec<SourceColumn>> {
        let sql = format!("SELECT * FROM {} LIMIT 0", self.table.quoted());
        let statement = self
            .connection
            .prepare(&sql)
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))?;

        Ok(statement
            .columns()
            .iter()
            .map(|c| SourceColumn::new(c.name(), c.type_().name(), is_native_type(c.type_())))
            .collect())
    }

    async fn fetch_page(&mut self, query: &PageQuery, after: Option<i64>) -> Result<RowBatch> {
        let statement = self.statement(query, after).await?;
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let params: Vec<&(dyn ToSql + Sync)> = match &after {
            Some(key) => vec![key as &(dyn ToSql + Sync), &limit],
            None => vec![&limit as &(dyn ToSql + Sync)],
        };
        let rows = self
            .connection
            .query(&statement, &params)
            .await
            .map_err(|e| DbmaskError::Database(format_pg_error(&e)))?;

        let mut batch = RowBatch::with_capacity(rows.len());
        for row in rows {
            let mut record = RowRecord::with_capacity(row.len());
            for (idx, column) in row.columns().iter().enumerate() {
                let value: Value = row
                    .try_get(idx)
                    .map_err(|e| DbmaskError::Database(format_pg_error(&e)))?;
                record.set(column.name(), value);
            }
            batch.push(record);
        }

        Ok(batch)
    }
}
