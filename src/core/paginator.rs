//! Keyset pagination
//!
//! Streams a table in key order using `key > last_seen ORDER BY key LIMIT n`. The first page
//! has no lower bound, so every integer key (including `i64::MIN`) is reachable. There is no
//! row-skipping offset anywhere, so the cost of a page does not depend on how many pages
//! came before it.
//!
//! The key must be an integer column that only grows while the scan runs. Rows inserted
//! behind the current seek position are not seen by the scan.
//!
//! There is no retry: the first error from the reader ends the scan.

use crate::adapters::database::traits::{PageQuery, SelectColumn, SourceColumn, TableReader};
use crate::domain::{DbmaskError, Result, RowBatch, SqlIdentifier, Value};
use async_trait::async_trait;

/// Pages between two progress log lines
const PROGRESS_EVERY_PAGES: u64 = 100;

/// Receives each page of a scan
#[async_trait]
pub trait BatchHandler: Send {
    /// Handle one page; the page is dropped afterwards
    ///
    /// # Errors
    ///
    /// Any error aborts the scan.
    async fn handle(&mut self, batch: RowBatch) -> Result<()>;
}

/// Totals for one completed scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Non-empty pages delivered
    pub pages: u64,
    pub rows: u64,
}

/// Plans and drives keyset scans with a fixed page size
#[derive(Debug, Clone, Copy)]
pub struct KeysetPaginator {
    batch_size: usize,
}

impl KeysetPaginator {
    /// Create a paginator fetching `batch_size` rows per page
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Validation`] if `batch_size` is zero.
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(DbmaskError::Validation(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    /// Rows per page
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build the page query for `table`
    ///
    /// `columns` is the projection in order. The key column must be one of them.
    ///
    /// # Arguments
    ///
    /// * `table` - Table to scan
    /// * `key` - Integer column used as the seek key
    /// * `columns` - Columns as discovered on the source; non-native ones are cast to text
    ///
    /// # Example
    ///
    /// ```rust
    /// use dbmask::adapters::database::traits::SourceColumn;
    /// use dbmask::core::KeysetPaginator;
    /// use dbmask::domain::SqlIdentifier;
    ///
    /// let paginator = KeysetPaginator::new(500)?;
    /// let table = SqlIdentifier::new("users").unwrap();
    /// let key = SqlIdentifier::new("id").unwrap();
    /// let columns = [
    ///     SourceColumn::new("id", "bigint", true),
    ///     SourceColumn::new("email", "citext", false),
    /// ];
    ///
    /// let query = paginator.plan(&table, &key, &columns)?;
    /// assert_eq!(query.limit, 500);
    /// assert!(query.to_sql(Some(10)).contains("\"email\"::text"));
    /// # Ok::<(), dbmask::domain::DbmaskError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Validation`] if a column name is not a plain identifier or the
    /// key is not projected.
    pub fn plan(
        &self,
        table: &SqlIdentifier,
        key: &SqlIdentifier,
        columns: &[SourceColumn],
    ) -> Result<PageQuery> {
        let columns = columns
            .iter()
            .map(|c| {
                Ok(SelectColumn {
                    name: SqlIdentifier::new(c.name.as_str()).map_err(|e| {
                        DbmaskError::Validation(format!("{table}: {e}"))
                    })?,
                    as_text: !c.native,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if !columns.iter().any(|c| &c.name == key) {
            return Err(DbmaskError::Validation(format!(
                "Primary key column '{key}' not found in table '{table}'"
            )));
        }

        Ok(PageQuery {
            table: table.clone(),
            key: key.clone(),
            columns,
            limit: self.batch_size,
        })
    }

    /// Start a scan
    pub fn scan<'r>(&self, reader: &'r mut dyn TableReader, query: PageQuery) -> KeysetScan<'r> {
        KeysetScan::new(reader, query)
    }

    /// Stream a whole table into `handler`, one page at a time
    ///
    /// Each page is handed over before the next one is fetched, so at most one page is held
    /// in memory.
    ///
    /// # Arguments
    ///
    /// * `reader` - Source of pages for one database
    /// * `query` - Plan from [`KeysetPaginator::plan`]
    /// * `handler` - Receives every page in key order
    ///
    /// # Returns
    ///
    /// Page and row totals for the scan
    ///
    /// # Errors
    ///
    /// Returns the first reader or handler error.
    pub async fn stream_table(
        &self,
        reader: &mut dyn TableReader,
        query: PageQuery,
        handler: &mut dyn BatchHandler,
    ) -> Result<ScanStats> {
        let table = query.table.clone();
        tracing::info!(
            table = %table,
            batch_size = query.limit,
            "Streaming table with keyset pagination"
        );

        let mut scan = self.scan(reader, query);
        while let Some(batch) = scan.next_page().await? {
            handler.handle(batch).await?;
        }

        let stats = scan.stats();
        tracing::info!(
            table = %table,
            pages = stats.pages,
            rows = stats.rows,
            "Completed streaming table"
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Init,
    Fetching { after: i64 },
    Done,
}

/// One in-progress scan
///
/// `INIT -> FETCHING -> (deliver, FETCHING)* -> DONE`. `INIT` fetches the first page with no
/// lower bound. The seek key then advances to the largest key of each delivered page, read
/// before the page is handed out.
pub struct KeysetScan<'r> {
    reader: &'r mut dyn TableReader,
    query: PageQuery,
    state: ScanState,
    stats: ScanStats,
}

impl<'r> KeysetScan<'r> {
    fn new(reader: &'r mut dyn TableReader, query: PageQuery) -> Self {
        Self {
            reader,
            query,
            state: ScanState::Init,
            stats: ScanStats::default(),
        }
    }

    /// Fetch the next page, `None` once the table is exhausted
    ///
    /// # Errors
    ///
    /// Returns reader errors, a non-integer key, or a key that fails to advance.
    pub async fn next_page(&mut self) -> Result<Option<RowBatch>> {
        let after = match self.state {
            ScanState::Init => None,
            ScanState::Fetching { after } => Some(after),
            ScanState::Done => return Ok(None),
        };

        let batch = match self.reader.fetch_page(&self.query, after).await {
            Ok(batch) => batch,
            Err(e) => {
                self.state = ScanState::Done;
                return Err(e);
            }
        };

        if batch.is_empty() {
            self.state = ScanState::Done;
            return Ok(None);
        }

        let max_key = match self.max_key(&batch, after) {
            Ok(key) => key,
            Err(e) => {
                self.state = ScanState::Done;
                return Err(e);
            }
        };

        self.state = ScanState::Fetching { after: max_key };
        self.stats.pages += 1;
        self.stats.rows += batch.len() as u64;

        if self.stats.pages % PROGRESS_EVERY_PAGES == 0 {
            tracing::info!(
                table = %self.query.table,
                pages = self.stats.pages,
                rows = self.stats.rows,
                "Scan progress"
            );
        }

        Ok(Some(batch))
    }

    /// Pages and rows delivered so far
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    fn max_key(&self, batch: &RowBatch, after: Option<i64>) -> Result<i64> {
        let key = self.query.key.as_str();
        let mut max: Option<i64> = None;

        for row in batch.iter() {
            match row.get(key) {
                Some(Value::Int(k)) => max = Some(max.map_or(*k, |m| m.max(*k))),
                _ => {
                    return Err(DbmaskError::Database(format!(
                        "Primary key '{}.{key}' must be a non-null integer",
                        self.query.table
                    )))
                }
            }
        }

        match (max, after) {
            (Some(max), Some(after)) if max <= after => Err(DbmaskError::Database(format!(
                "Keyset scan of '{}' did not advance past key {after}",
                self.query.table
            ))),
            (Some(max), _) => Ok(max),
            (None, _) => Err(DbmaskError::Database(format!(
                "Keyset scan of '{}' returned a page without keys",
                self.query.table
            ))),
        }
    }
}
