//! PostgreSQL integration
//!
//! - [`client`]: per-database connection pools
//! - [`source`]: keyset page reads from the source
//! - [`restore`]: transactional inserts into the target
//! - [`values`]: wire conversions for [`Value`](crate::domain::Value)

pub mod client;
pub mod restore;
pub mod source;
pub mod values;

pub use client::{format_pg_error, PostgresClient};
pub use restore::{
    DirectRestoreWriter, PooledConnection, RestoreConnection, RestoreOptions, RestoreSinkFactory,
};
pub use source::{PostgresSource, PostgresTableReader};
