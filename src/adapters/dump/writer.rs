//! SQL dump writer
//!
//! Produces a PostgreSQL script that replays the anonymized rows: a header, one
//! multi-row `INSERT` per page and a footer. The whole script runs in one transaction with
//! triggers and foreign keys disabled through `session_replication_role`.
//!
//! A run that did not finish still gets its footer on close, preceded by a comment that
//! marks the file as partial.

use crate::adapters::database::traits::{BatchSink, SinkFactory, SinkSummary};
use crate::config::schema::OutputConfig;
use crate::domain::{DbmaskError, Result, RowBatch, SqlIdentifier, Value};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

enum DumpOutput {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl DumpOutput {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            DumpOutput::Plain(w) => w,
            DumpOutput::Gzip(w) => w,
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            DumpOutput::Plain(mut w) => w.flush(),
            DumpOutput::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Writes one database's anonymized rows as a SQL script
pub struct DumpWriter {
    path: PathBuf,
    output: Option<DumpOutput>,
    success: bool,
    summary: SinkSummary,
}

impl DumpWriter {
    /// Create the file (and its parent directories) and write the header
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Io`] if the file cannot be created or written.
    pub fn create(path: impl AsRef<Path>, database: &str, compress: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = BufWriter::new(File::create(&path)?);
        let output = if compress {
            DumpOutput::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            DumpOutput::Plain(file)
        };

        let mut writer = Self {
            path,
            output: Some(output),
            success: false,
            summary: SinkSummary::default(),
        };
        writer.write_header(database)?;

        tracing::info!(path = %writer.path.display(), compress, "SQL dump writer initialized");
        Ok(writer)
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn out(&mut self) -> Result<&mut dyn Write> {
        self.output
            .as_mut()
            .map(DumpOutput::writer)
            .ok_or_else(|| DbmaskError::Io("dump writer is already closed".to_string()))
    }

    fn write_header(&mut self, database: &str) -> Result<()> {
        let generated = chrono::Utc::now().to_rfc3339();
        let out = self.out()?;
        writeln!(out, "-- Dbmask anonymized output")?;
        writeln!(out, "-- Generated: {generated}")?;
        writeln!(out, "-- WARNING: This file contains anonymized data")?;
        writeln!(out, "-- Database: {database}")?;
        writeln!(out)?;
        writeln!(out, "SET client_encoding = 'UTF8';")?;
        writeln!(out, "SET session_replication_role = replica;")?;
        writeln!(out, "BEGIN;")?;
        writeln!(out)?;
        Ok(())
    }

    fn write_footer(output: &mut DumpOutput, success: bool) -> std::io::Result<()> {
        let out = output.writer();
        writeln!(out)?;
        if !success {
            writeln!(
                out,
                "-- WARNING: run did not complete; this file contains partial data"
            )?;
        }
        writeln!(out, "COMMIT;")?;
        writeln!(out, "SET session_replication_role = DEFAULT;")?;
        Ok(())
    }

    /// Append one page as a multi-row `INSERT`
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Io`] on write failure.
    pub fn write_rows(
        &mut self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &RowBatch,
    ) -> Result<()> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(());
        }

        let column_list = columns
            .iter()
            .map(SqlIdentifier::quoted)
            .collect::<Vec<_>>()
            .join(", ");

        let mut statement = format!("INSERT INTO {} ({column_list}) VALUES\n", table.quoted());
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                statement.push_str(",\n");
            }
            statement.push('(');
            for (j, column) in columns.iter().enumerate() {
                if j > 0 {
                    statement.push_str(", ");
                }
                statement.push_str(&sql_literal(row.get(column.as_str())));
            }
            statement.push(')');
        }
        statement.push_str(";\n");

        self.out()?.write_all(statement.as_bytes())?;
        self.summary.batches_written += 1;
        self.summary.rows_written += rows.len() as u64;
        Ok(())
    }

    /// Write the footer and flush; idempotent
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Io`] if the footer or the final flush fails.
    pub fn finish(&mut self) -> Result<SinkSummary> {
        let Some(mut output) = self.output.take() else {
            return Ok(self.summary);
        };

        Self::write_footer(&mut output, self.success)?;
        output.finish()?;

        if self.success {
            tracing::info!(
                path = %self.path.display(),
                rows = self.summary.rows_written,
                "SQL dump completed"
            );
        } else {
            tracing::warn!(path = %self.path.display(), "SQL dump closed as partial");
        }
        Ok(self.summary)
    }
}

impl Drop for DumpWriter {
    fn drop(&mut self) {
        if let Some(mut output) = self.output.take() {
            let result =
                Self::write_footer(&mut output, self.success).and_then(|()| output.finish());
            if let Err(e) = result {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to finalize SQL dump");
            }
        }
    }
}

/// Render a value as a PostgreSQL literal
///
/// `None` (column absent from the row) renders as `NULL`, like SQL NULL itself.
pub fn sql_literal(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::Bool(true)) => "TRUE".to_string(),
        Some(Value::Bool(false)) => "FALSE".to_string(),
        Some(Value::Int(v)) => v.to_string(),
        Some(Value::Float(v)) if v.is_finite() => v.to_string(),
        Some(Value::Float(v)) if v.is_nan() => "'NaN'".to_string(),
        Some(Value::Float(v)) if *v > 0.0 => "'Infinity'".to_string(),
        Some(Value::Float(_)) => "'-Infinity'".to_string(),
        Some(Value::Text(s)) => escape_string_literal(s),
    }
}

/// Quote text as an `E'..'` literal
///
/// Backslash and quote are escaped, as are all control characters: newline, carriage
/// return, tab, backspace and form feed get their short escapes, the remaining C0 characters
/// and DEL are written as `\xHH`. NUL bytes are dropped since PostgreSQL text cannot hold
/// them. The output never contains a raw control character.
///
/// # Examples
///
/// ```
/// use dbmask::adapters::dump::escape_string_literal;
///
/// assert_eq!(escape_string_literal("O'Brien"), "E'O\\'Brien'");
/// assert_eq!(escape_string_literal("a\tb"), "E'a\\tb'");
/// ```
pub fn escape_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    out.push_str("E'");
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\0' => {}
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[async_trait]
impl BatchSink for DumpWriter {
    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    async fn prepare(&mut self, _tables: &[SqlIdentifier]) -> Result<()> {
        Ok(())
    }

    async fn write_batch(
        &mut self,
        table: &SqlIdentifier,
        columns: &[SqlIdentifier],
        rows: &RowBatch,
    ) -> Result<()> {
        self.write_rows(table, columns, rows)
    }

    fn mark_success(&mut self) {
        self.success = true;
    }

    async fn close(&mut self) -> Result<SinkSummary> {
        self.finish()
    }
}

/// Opens one [`DumpWriter`] per database under the configured path
pub struct DumpSinkFactory {
    output: OutputConfig,
}

impl DumpSinkFactory {
    pub fn new(output: OutputConfig) -> Self {
        Self { output }
    }
}

#[async_trait]
impl SinkFactory for DumpSinkFactory {
    async fn open(&self, database: &str) -> Result<Box<dyn BatchSink>> {
        let path = self.output.dump_path_for(database);
        let writer = DumpWriter::create(path, database, self.output.compress)?;
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RowRecord;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;
    use test_case::test_case;

    fn id(s: &str) -> SqlIdentifier {
        SqlIdentifier::new(s).unwrap()
    }

    #[test_case(None, "NULL" ; "absent")]
    #[test_case(Some(Value::Null), "NULL" ; "null")]
    #[test_case(Some(Value::Int(-3)), "-3" ; "int")]
    #[test_case(Some(Value::Float(1.5)), "1.5" ; "float")]
    #[test_case(Some(Value::Float(f64::NAN)), "'NaN'" ; "nan")]
    #[test_case(Some(Value::Float(f64::NEG_INFINITY)), "'-Infinity'" ; "negative infinity")]
    #[test_case(Some(Value::Bool(false)), "FALSE" ; "bool")]
    #[test_case(Some(Value::from("O'Brien")), "E'O\\'Brien'" ; "quote")]
    #[test_case(Some(Value::from("a\\b\nc\rd\0e")), "E'a\\\\b\\nc\\rde'" ; "escapes")]
    #[test_case(Some(Value::from("a\tb\u{08}c\u{0C}d")), "E'a\\tb\\bc\\fd'" ; "short control escapes")]
    #[test_case(Some(Value::from("x\u{01}y\u{1B}z\u{7F}")), "E'x\\x01y\\x1Bz\\x7F'" ; "hex control escapes")]
    fn test_sql_literal(value: Option<Value>, expected: &str) {
        assert_eq!(sql_literal(value.as_ref()), expected);
    }

    #[test]
    fn test_dump_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("app.sql");
        let mut writer = DumpWriter::create(&path, "app", false).unwrap();

        let rows = RowBatch::from(vec![
            RowRecord::new().with("id", 1i64).with("name", "A"),
            RowRecord::new().with("id", 2i64),
        ]);
        writer
            .write_rows(&id("users"), &[id("id"), id("name")], &rows)
            .unwrap();
        writer.mark_success();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.rows_written, 2);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("-- Dbmask anonymized output\n"));
        assert!(content.contains("-- Database: app\n"));
        assert!(content.contains(
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES\n(1, E'A'),\n(2, NULL);\n"
        ));
        assert!(content.ends_with("COMMIT;\nSET session_replication_role = DEFAULT;\n"));
        assert!(!content.contains("partial data"));

        let replica = content.find("SET session_replication_role = replica;").unwrap();
        let insert = content.find("INSERT INTO").unwrap();
        assert!(replica < insert);
    }

    #[test]
    fn test_partial_dump_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.sql");
        {
            let writer = DumpWriter::create(&path, "app", false).unwrap();
            drop(writer);
        }

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("partial data"));
        assert!(content.ends_with("SET session_replication_role = DEFAULT;\n"));
    }

    #[test]
    fn test_gzip_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.sql.gz");
        let mut writer = DumpWriter::create(&path, "app", true).unwrap();
        writer.mark_success();
        writer.finish().unwrap();

        let mut decoded = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert!(decoded.contains("BEGIN;"));
        assert!(decoded.contains("COMMIT;"));
    }
}
