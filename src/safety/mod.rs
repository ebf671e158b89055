//! Safety checks run before any data moves
//!
//! ```rust
//! use dbmask::config::SafetyConfig;
//! use dbmask::safety::SafetyGate;
//!
//! let gate = SafetyGate::new(&SafetyConfig::default())?;
//! assert!(!gate.validate_safe_to_connect("db-prod-01", "app", None).is_allowed());
//! assert!(gate.validate_safe_to_connect("uat-db", "app", None).is_allowed());
//! # Ok::<(), dbmask::domain::DbmaskError>(())
//! ```

pub mod gate;

pub use gate::{SafetyDecision, SafetyGate, BUILT_IN_DENY_PATTERNS};
