//! Production safety gate
//!
//! Decides, before any row leaves the source, whether a host/database pair may be used.
//! The order of checks is fixed:
//!
//! 1. Gate disabled: allow, with a warning.
//! 2. Non-empty allowlist: the host must match an entry, otherwise deny.
//! 3. Host not allowlisted: built-in and custom deny patterns are checked against the host
//!    and the database name.
//! 4. Explicit approval required: the supplied token must equal the configured one. An
//!    allowlist entry does not skip this step.

use crate::config::schema::SafetyConfig;
use crate::config::SecretString;
use crate::domain::{DbmaskError, Result};
use regex::{Regex, RegexBuilder};
use secrecy::ExposeSecret;
use std::fmt;

/// Built-in deny patterns, matched case-insensitively against the whole value
pub const BUILT_IN_DENY_PATTERNS: [&str; 4] = [".*prod.*", ".*production.*", ".*prd.*", ".*live.*"];

/// Outcome of a safety check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny { reason: String },
}

impl SafetyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyDecision::Allow)
    }

    fn deny(reason: impl Into<String>) -> Self {
        SafetyDecision::Deny {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SafetyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyDecision::Allow => write!(f, "ALLOWED"),
            SafetyDecision::Deny { reason } => write!(f, "DENIED: {reason}"),
        }
    }
}

struct DenyPattern {
    source: String,
    regex: Regex,
}

struct AllowEntry {
    source: String,
    glob: Option<Regex>,
}

/// Compiled safety gate
pub struct SafetyGate {
    enabled: bool,
    allowlist: Vec<AllowEntry>,
    built_in: Vec<DenyPattern>,
    custom: Vec<DenyPattern>,
    require_approval: bool,
    approval_flag: Option<SecretString>,
}

impl fmt::Debug for SafetyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyGate")
            .field("enabled", &self.enabled)
            .field(
                "allowlist",
                &self.allowlist.iter().map(|e| &e.source).collect::<Vec<_>>(),
            )
            .field(
                "custom",
                &self.custom.iter().map(|p| &p.source).collect::<Vec<_>>(),
            )
            .field("require_approval", &self.require_approval)
            .finish()
    }
}

fn full_match(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
}

impl SafetyGate {
    /// Compile the gate from configuration
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Configuration`] if a custom deny pattern or an allowlist glob
    /// is not a valid regular expression.
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let built_in = BUILT_IN_DENY_PATTERNS
            .iter()
            .map(|p| {
                Ok(DenyPattern {
                    source: (*p).to_string(),
                    regex: full_match(p)
                        .map_err(|e| DbmaskError::Configuration(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let custom = config
            .denied_patterns
            .iter()
            .map(|p| {
                Ok(DenyPattern {
                    source: p.clone(),
                    regex: full_match(p).map_err(|e| {
                        DbmaskError::Configuration(format!("Invalid deny pattern '{p}': {e}"))
                    })?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let allowlist = config
            .allowed_hosts
            .iter()
            .map(|entry| {
                let glob = if entry.contains('*') {
                    let escaped = regex::escape(entry).replace(r"\*", ".*");
                    Some(full_match(&escaped).map_err(|e| {
                        DbmaskError::Configuration(format!("Invalid allowlist entry '{entry}': {e}"))
                    })?)
                } else {
                    None
                };
                Ok(AllowEntry {
                    source: entry.clone(),
                    glob,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            allowlist,
            built_in,
            custom,
            require_approval: config.require_explicit_approval,
            approval_flag: config.approval_flag.clone(),
        })
    }

    /// Decide whether `host`/`database` may be used
    pub fn validate_safe_to_connect(
        &self,
        host: &str,
        database: &str,
        approval: Option<&str>,
    ) -> SafetyDecision {
        if !self.enabled {
            tracing::warn!(
                host,
                database,
                "SAFETY GATE DISABLED - proceeding without safety checks"
            );
            return SafetyDecision::Allow;
        }

        tracing::info!(host, database, "Running safety checks");

        let host_allowlisted = if self.allowlist.is_empty() {
            false
        } else if self.is_allowlisted(host) {
            true
        } else {
            let entries: Vec<&str> = self.allowlist.iter().map(|e| e.source.as_str()).collect();
            return SafetyDecision::deny(format!(
                "Host '{host}' not in allowlist [{}]",
                entries.join(", ")
            ));
        };

        if !host_allowlisted {
            if let Some(pattern) = first_match(&self.built_in, host, database) {
                return SafetyDecision::deny(format!(
                    "Host '{host}' or database '{database}' matches production pattern '{pattern}'. \
                     If this is intentional, add the host to safety.allowed_hosts"
                ));
            }
            if let Some(pattern) = first_match(&self.custom, host, database) {
                return SafetyDecision::deny(format!(
                    "Host '{host}' or database '{database}' matches custom deny pattern '{pattern}'"
                ));
            }
        }

        if self.require_approval && !self.approval_matches(approval) {
            return SafetyDecision::deny(
                "Explicit approval required but not provided or incorrect. \
                 Set safety.approval_flag and pass it with --approve",
            );
        }

        tracing::info!(host, database, "Safety checks passed");
        SafetyDecision::Allow
    }

    /// Like [`validate_safe_to_connect`](Self::validate_safe_to_connect), as a `Result`
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Safety`] carrying the deny reason.
    pub fn ensure_safe_to_connect(
        &self,
        host: &str,
        database: &str,
        approval: Option<&str>,
    ) -> Result<()> {
        match self.validate_safe_to_connect(host, database, approval) {
            SafetyDecision::Allow => Ok(()),
            SafetyDecision::Deny { reason } => {
                tracing::error!(host, database, reason = %reason, "Safety check denied");
                Err(DbmaskError::Safety(reason))
            }
        }
    }

    fn is_allowlisted(&self, host: &str) -> bool {
        self.allowlist.iter().any(|entry| {
            entry.source.eq_ignore_ascii_case(host)
                || entry.glob.as_ref().is_some_and(|g| g.is_match(host))
        })
    }

    fn approval_matches(&self, approval: Option<&str>) -> bool {
        match (self.approval_flag.as_ref(), approval) {
            (Some(expected), Some(given)) => {
                let expected = expected.expose_secret();
                !expected.is_empty() && expected.as_ref() == given
            }
            _ => false,
        }
    }
}

fn first_match<'a>(patterns: &'a [DenyPattern], host: &str, database: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| p.regex.is_match(host) || p.regex.is_match(database))
        .map(|p| p.source.as_str())
}
