//! Domain models and types for dbmask.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Validated identifiers** ([`SqlIdentifier`]) for anything spliced into SQL
//! - **Row model** ([`Value`], [`RowRecord`], [`RowBatch`])
//! - **Error types** ([`DbmaskError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, DbmaskError>`]:
//!
//! ```rust,no_run
//! use dbmask::domain::{DbmaskError, Result};
//!
//! fn example() -> Result<()> {
//!     let config = dbmask::config::load_config("dbmask.toml")?;
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod ids;
pub mod result;
pub mod row;

// Re-export commonly used types for convenience
pub use errors::DbmaskError;
pub use ids::SqlIdentifier;
pub use result::Result;
pub use row::{RowBatch, RowRecord, Value};
