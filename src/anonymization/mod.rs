//! Deterministic anonymization
//!
//! - [`transformer`]: keyed HMAC-SHA256 value transforms (hash, fake name, mask, generalize)
//! - [`strategy`]: rule-file strategies resolved into a closed [`Strategy`] enum
//! - [`engine`]: applies the compiled rules to a [`RowBatch`](crate::domain::RowBatch)
//!
//! # Usage
//!
//! ```rust
//! use dbmask::anonymization::{AnonymizationEngine, CompiledRuleSet, DeterministicTransformer};
//! use dbmask::config::parse_rules;
//! use dbmask::domain::{RowBatch, RowRecord};
//!
//! # fn example() -> dbmask::domain::Result<()> {
//! let rules = parse_rules(r#"
//! [databases.app.tables.users]
//! primary_key = "id"
//! [databases.app.tables.users.columns.phone]
//! strategy = "MASK"
//! "#)?;
//!
//! let engine = AnonymizationEngine::new(
//!     DeterministicTransformer::new("test-secret-key-32-characters-long-123456")?,
//!     CompiledRuleSet::compile(&rules)?,
//! );
//!
//! let mut batch = RowBatch::from(vec![RowRecord::new().with("id", 1i64).with("phone", "9876543210")]);
//! let tally = engine.anonymize_batch("app", "users", &mut batch)?;
//! assert_eq!(tally.get("MASK"), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod engine;
pub mod strategy;
pub mod transformer;

pub use engine::{AnonymizationEngine, StrategyTally};
pub use strategy::{CompiledColumn, CompiledRuleSet, CompiledTable, Strategy};
pub use transformer::{mask_keep_last, DatePrecision, DeterministicTransformer};
