//! SQL identifier type with validation
//!
//! Table, column and database names arrive from rule files and configuration. They are
//! validated once here and only ever spliced into SQL through [`SqlIdentifier::quoted`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated SQL identifier (`^[A-Za-z0-9_]+$`)
///
/// # Examples
///
/// ```
/// use dbmask::domain::ids::SqlIdentifier;
///
/// let table = SqlIdentifier::new("m_beneficiary").unwrap();
/// assert_eq!(table.quoted(), "\"m_beneficiary\"");
///
/// assert!(SqlIdentifier::new("users; DROP TABLE x").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    /// Creates a new identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty or contains anything other than
    /// ASCII letters, digits and underscores.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if !is_valid_identifier(&id) {
            return Err(format!(
                "Invalid identifier: '{id}' (only alphanumeric and underscore allowed)"
            ));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the identifier double-quoted for use in PostgreSQL statements
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

/// Returns true when `id` is a non-empty run of `[A-Za-z0-9_]`
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

impl fmt::Display for SqlIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SqlIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SqlIdentifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SqlIdentifier> for String {
    fn from(id: SqlIdentifier) -> Self {
        id.0
    }
}

impl AsRef<str> for SqlIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
