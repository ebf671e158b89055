//! Database abstraction layer
//!
//! The pipeline reads through [`SourceDatabase`] / [`TableReader`] and writes through
//! [`SinkFactory`] / [`BatchSink`], so the keyset scan and the rule engine never see a
//! concrete driver.

pub mod factory;
pub mod traits;

pub use factory::{create_sink_factory, create_source};
pub use traits::{
    BatchSink, PageQuery, SelectColumn, SinkFactory, SinkSummary, SourceColumn, SourceDatabase,
    TableReader,
};
