//! Row model shared by the paginator, the rule engine and the sinks
//!
//! A [`RowBatch`] is the unit of transfer between those three stages. It lives for exactly
//! one page and is dropped once the sink has accepted it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single cell value
///
/// Temporal, JSON and UUID columns are carried as their canonical text form; everything the
/// transformer touches is text in the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer column
    Int(i64),
    /// Any floating point column
    Float(f64),
    /// Text and everything decoded to text
    Text(String),
}

impl Value {
    /// Returns true for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if any
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value's text form, `None` for NULL
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One source row: an ordered column -> value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    fields: Vec<(String, Value)>,
}

impl RowRecord {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty row with room for `columns` fields
    pub fn with_capacity(columns: usize) -> Self {
        Self {
            fields: Vec::with_capacity(columns),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Set a column, keeping its position if it already exists
    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Get a column's value
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Get a mutable reference to a column's value
    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Whether the row carries the column at all (NULL counts as present)
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Column names in row order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An ordered page of rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    rows: Vec<RowRecord>,
}

impl RowBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `rows` rows
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            rows: Vec::with_capacity(rows),
        }
    }

    /// Append a row
    pub fn push(&mut self, row: RowRecord) {
        self.rows.push(row);
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows
    pub fn iter(&self) -> std::slice::Iter<'_, RowRecord> {
        self.rows.iter()
    }

    /// Iterate rows mutably
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, RowRecord> {
        self.rows.iter_mut()
    }

    /// Borrow the rows as a slice
    pub fn rows(&self) -> &[RowRecord] {
        &self.rows
    }
}

impl From<Vec<RowRecord>> for RowBatch {
    fn from(rows: Vec<RowRecord>) -> Self {
        Self { rows }
    }
}

impl IntoIterator for RowBatch {
    type Item = RowRecord;
    type IntoIter = std::vec::IntoIter<RowRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a RowBatch {
    type Item = &'a RowRecord;
    type IntoIter = std::slice::Iter<'a, RowRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_keeps_insertion_order() {
        let row = RowRecord::new()
            .with("id", 1i64)
            .with("name", "Rajesh")
            .with("phone", "9876543210");

        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["id", "name", "phone"]);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut row = RowRecord::new().with("id", 1i64).with("name", "Rajesh");
        row.set("id", Value::Int(7));

        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.columns().next(), Some("id"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_null_is_present() {
        let row = RowRecord::new().with("email", Value::Null);
        assert!(row.contains("email"));
        assert!(!row.contains("phone"));
    }

    #[test]
    fn test_value_text_form() {
        assert_eq!(Value::Int(42).to_text(), Some("42".to_string()));
        assert_eq!(Value::Bool(true).to_text(), Some("true".to_string()));
        assert_eq!(Value::from("abc").to_text(), Some("abc".to_string()));
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
