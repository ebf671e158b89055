//! External system integrations for dbmask.
//!
//! - [`database`] - Source/sink traits and the factories that pick implementations
//! - [`postgresql`] - PostgreSQL source reader and direct restore writer
//! - [`dump`] - SQL script output
//!
//! # Design Pattern
//!
//! Adapters isolate drivers and file formats behind the traits in [`database::traits`], so
//! the pipeline can be exercised with in-memory implementations.
//!
//! ```rust,no_run
//! use dbmask::adapters::database::{create_sink_factory, create_source};
//! use dbmask::config::load_config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("dbmask.toml")?;
//! let source = create_source(&config);
//! let sinks = create_sink_factory(&config)?;
//!
//! let mut sink = sinks.open("app").await?;
//! println!("Writing to {}", sink.describe());
//! sink.close().await?;
//! # let _ = source;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod dump;
pub mod postgresql;
