//! Database abstraction traits
//!
//! The pipeline only talks to these traits. PostgreSQL and the dump file implement them in
//! this crate; tests implement them in memory.

use crate::domain::{Result, RowBatch, SqlIdentifier};
use async_trait::async_trait;

/// A column as reported by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    /// Column name
    pub name: String,

    /// Database type name, informational
    pub data_type: String,

    /// Whether the reader can decode the type directly; other columns are read as text
    pub native: bool,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, native: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            native,
        }
    }
}

/// One projected column of a page query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    pub name: SqlIdentifier,

    /// Project as `"c"::text AS "c"`
    pub as_text: bool,
}

/// A planned keyset page query
///
/// A seek page renders as `SELECT .. FROM "t" WHERE "pk" > $1 ORDER BY "pk" LIMIT $2`. The
/// first page of a scan has no lower bound and renders as
/// `SELECT .. FROM "t" ORDER BY "pk" LIMIT $1`, so a row keyed `i64::MIN` is still read.
/// Neither form skips rows by offset, so every page costs the same regardless of its
/// position in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub table: SqlIdentifier,
    pub key: SqlIdentifier,
    pub columns: Vec<SelectColumn>,
    pub limit: usize,
}

impl PageQuery {
    /// Render the statement for the page that follows `after`
    ///
    /// With `Some(key)`, `$1` is the exclusive lower bound on the key and `$2` the page size.
    /// With `None` (first page), `$1` is the page size.
    ///
    /// # Examples
    ///
    /// ```
    /// use dbmask::adapters::database::traits::{PageQuery, SelectColumn};
    /// use dbmask::domain::SqlIdentifier;
    ///
    /// let id = SqlIdentifier::new("id")?;
    /// let query = PageQuery {
    ///     table: SqlIdentifier::new("users")?,
    ///     key: id.clone(),
    ///     columns: vec![SelectColumn { name: id, as_text: false }],
    ///     limit: 500,
    /// };
    /// assert_eq!(
    ///     query.to_sql(None),
    ///     "SELECT \"id\" FROM \"users\" ORDER BY \"id\" LIMIT $1::bigint"
    /// );
    /// assert!(query.to_sql(Some(42)).contains("WHERE \"id\" > $1::bigint"));
    /// # Ok::<(), String>(())
    /// ```
    pub fn to_sql(&self, after: Option<i64>) -> String {
        let projection = self
            .columns
            .iter()
            .map(|c| {
                if c.as_text {
                    format!("{0}::text AS {0}", c.name.quoted())
                } else {
                    c.name.quoted()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let table = self.table.quoted();
        let key = self.key.quoted();
        match after {
            Some(_) => format!(
                "SELECT {projection} FROM {table} WHERE {key} > $1::bigint ORDER BY {key} LIMIT $2::bigint"
            ),
            None => format!("SELECT {projection} FROM {table} ORDER BY {key} LIMIT $1::bigint"),
        }
    }

    /// Names of the projected columns, in order
    pub fn column_names(&self) -> Vec<SqlIdentifier> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Reads one table; holds one source connection for the life of the scan
#[async_trait]
pub trait TableReader: Send {
    /// Columns of the table in ordinal order
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or cannot be described.
    async fn columns(&mut self) -> Result<Vec<SourceColumn>>;

    /// Fetch up to `query.limit` rows in key order
    ///
    /// `after` is the exclusive lower bound on the key; `None` reads from the start of the
    /// table.
    ///
    /// # Errors
    ///
    /// Returns an error on any I/O failure, or if the key column is not an integer.
    async fn fetch_page(&mut self, query: &PageQuery, after: Option<i64>) -> Result<RowBatch>;
}

/// A source of tables
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Open a reader for one table of one database
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained.
    async fn open_table(
        &self,
        database: &str,
        table: &SqlIdentifier,
    ) -> Result<Box<dyn TableReader>>;
}

/// Totals reported by a sink when it closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub batches_written: u64,
    pub rows_written: u64,
}

/// Consumer of anonymized pages
///
/// A sink is opened per database and must be closed on every exit path. Only a sink that
/// was marked successful before `close` finalizes its output as complete.
#[async_trait]
pub trait BatchSink: Send {
    /// Human-readable destination, free of credentials
    fn describe(&self) -> String;

    /// Called once with every table of the database before the first write
    ///
    /// # Errors
    ///
    /// Returns an error if preparation (e.g. truncation) fails.
    async fn prepare(&mut self, tables: &[SqlIdentifier]) -> Result<()>;

    /// Persist one page
    ///
    /// Columns absent from a row are written as NULL.
    ///
    /// # Errors
    ///
    /// Returns an error on any write failure.
    async fn write_batch(
        &mut self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &RowBatch,
    ) -> Result<()>;

    /// Record that every table was written
    fn mark_success(&mut self);

    /// Flush and release the destination
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush or commit fails.
    async fn close(&mut self) -> Result<SinkSummary>;
}

/// Opens one sink per database
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Open the sink for `database`
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be opened.
    async fn open(&self, database: &str) -> Result<Box<dyn BatchSink>>;
}
