//! Result type alias for dbmask

use super::errors::DbmaskError;

/// Result type alias for dbmask operations
///
/// # Examples
///
/// ```
/// use dbmask::domain::result::Result;
/// use dbmask::domain::errors::DbmaskError;
///
/// fn failing_function() -> Result<()> {
///     Err(DbmaskError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, DbmaskError>;
