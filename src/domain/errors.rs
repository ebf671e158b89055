//! Domain error types
//!
//! This module defines the error hierarchy for dbmask.
//! Errors carry identifiers and counts only; row values never end up in an error message
//! produced by this crate.

use thiserror::Error;

/// Main dbmask error type
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
pub enum DbmaskError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rule file errors (parse, structure, strategy resolution)
    #[error("Rules error: {0}")]
    Rules(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Safety gate denials
    #[error("Safety check failed: {0}")]
    Safety(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(String),

    /// Network/connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// A configured column was absent from a row while the policy is FAIL
    #[error("Unknown column {database}.{table}.{column} - policy is FAIL")]
    UnknownColumn {
        database: String,
        table: String,
        column: String,
    },

    /// Transformation errors
    #[error("Anonymization error: {0}")]
    Anonymization(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl DbmaskError {
    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DbmaskError::Configuration(_) | DbmaskError::Rules(_) | DbmaskError::Validation(_) => 2,
            DbmaskError::Safety(_) => 3,
            DbmaskError::Connection(_) => 4,
            _ => 1,
        }
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for DbmaskError {
    fn from(err: std::io::Error) -> Self {
        DbmaskError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for DbmaskError {
    fn from(err: serde_json::Error) -> Self {
        DbmaskError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for DbmaskError {
    fn from(err: toml::de::Error) -> Self {
        DbmaskError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbmask_error_display() {
        let err = DbmaskError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_unknown_column_display() {
        let err = DbmaskError::UnknownColumn {
            database: "app".to_string(),
            table: "users".to_string(),
            column: "email".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown column app.users.email - policy is FAIL"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DbmaskError::Rules("x".into()).exit_code(), 2);
        assert_eq!(DbmaskError::Safety("x".into()).exit_code(), 3);
        assert_eq!(DbmaskError::Connection("x".into()).exit_code(), 4);
        assert_eq!(DbmaskError::Database("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: DbmaskError = io_err.into();
        assert!(matches!(err, DbmaskError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: DbmaskError = json_err.into();
        assert!(matches!(err, DbmaskError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: DbmaskError = toml_err.into();
        assert!(matches!(err, DbmaskError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }
}
