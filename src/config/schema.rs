//! Configuration schema types
//!
//! This module defines the execution configuration that maps to `dbmask.toml`.

use crate::config::SecretString;
use serde::{Deserialize, Serialize};

/// Placeholder substituted with the database name in `output.path`
pub const DATABASE_PLACEHOLDER: &str = "{database}";

/// Report directory used when no configuration could be loaded
pub const DEFAULT_REPORT_PATH: &str = "./logs";

/// Where anonymized rows go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// SQL dump file, optionally gzip-compressed
    #[default]
    Dump,
    /// Insert directly into the target database
    Restore,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Dump => write!(f, "dump"),
            OutputMode::Restore => write!(f, "restore"),
        }
    }
}

/// How the target schema is emptied before a direct restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    /// Leave existing target rows in place
    #[default]
    None,
    /// `TRUNCATE .. CASCADE` every table, falling back to `Delete` when refused
    Truncate,
    /// `DELETE FROM` every table with triggers and FK checks off
    Delete,
}

impl std::fmt::Display for ResetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetMode::None => write!(f, "none"),
            ResetMode::Truncate => write!(f, "truncate"),
            ResetMode::Delete => write!(f, "delete"),
        }
    }
}

/// Main dbmask configuration
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbmaskConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Source database (read side)
    pub source: DatabaseConfig,

    /// Target database (required for restore mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DatabaseConfig>,

    /// Safety gate settings
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Performance tuning
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Path to the rule file
    #[serde(default = "default_rules_file")]
    pub rules_file: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DbmaskConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.source.validate("source")?;
        self.performance.validate()?;
        self.output.validate()?;
        self.logging.validate()?;

        if self.output.mode == OutputMode::Restore {
            match self.target {
                Some(ref target) => {
                    target.validate("target")?;
                    if target.read_only {
                        return Err(
                            "Target database is configured as read-only. Set target.read_only = false for restore mode"
                                .to_string(),
                        );
                    }
                }
                None => {
                    return Err(
                        "target configuration is required when output.mode = 'restore'"
                            .to_string(),
                    )
                }
            }
        }

        if self.rules_file.trim().is_empty() {
            return Err("rules_file cannot be empty".to_string());
        }

        self.safety.validate()
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Validate configuration and safety, then stop before reading any rows
    #[serde(default)]
    pub dry_run: bool,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
        }
    }
}

/// PostgreSQL connection settings for the source or the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Hostname, checked by the safety gate
    pub host: String,

    /// Port
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// User name
    pub username: String,

    /// Password, zeroized on drop
    #[serde(default = "default_secret")]
    pub password: SecretString,

    /// Open connections read-only
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// TLS mode (disable, prefer, require)
    #[serde(default = "default_pg_ssl_mode")]
    pub ssl_mode: String,

    /// Verify the server certificate when TLS is used
    #[serde(default = "default_true")]
    pub verify_server_certificate: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_pg_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,

    /// Statement timeout in seconds
    #[serde(default = "default_pg_statement_timeout_seconds")]
    pub statement_timeout_seconds: u64,

    /// Maximum number of pooled connections per database
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: usize,
}

impl DatabaseConfig {
    fn validate(&self, section: &str) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err(format!("{section}.host cannot be empty"));
        }

        if self.port == 0 {
            return Err(format!("{section}.port must be > 0"));
        }

        if self.username.trim().is_empty() {
            return Err(format!("{section}.username cannot be empty"));
        }

        let valid_ssl_modes = ["disable", "prefer", "require"];
        if !valid_ssl_modes.contains(&self.ssl_mode.as_str()) {
            return Err(format!(
                "{section}.ssl_mode must be one of: {}, got '{}'",
                valid_ssl_modes.join(", "),
                self.ssl_mode
            ));
        }

        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(format!(
                "{section}.max_connections must be between 1 and 100, got {}",
                self.max_connections
            ));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(format!("{section}.connection_timeout_seconds must be > 0"));
        }

        Ok(())
    }
}

/// Safety gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Master switch; disabling it is logged as a warning on every check
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hosts that may be connected to (exact, case-insensitive, `*` wildcards)
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Extra deny regexes matched against host and database name
    #[serde(default)]
    pub denied_patterns: Vec<String>,

    /// Require `--approve <token>` matching `approval_flag`
    #[serde(default)]
    pub require_explicit_approval: bool,

    /// Expected approval token
    #[serde(default)]
    pub approval_flag: Option<SecretString>,
}

impl SafetyConfig {
    fn validate(&self) -> Result<(), String> {
        for pattern in &self.denied_patterns {
            regex::Regex::new(pattern)
                .map_err(|e| format!("safety.denied_patterns contains invalid regex '{pattern}': {e}"))?;
        }

        if self.allowed_hosts.iter().any(|h| h.trim().is_empty()) {
            return Err("safety.allowed_hosts cannot contain empty entries".to_string());
        }

        Ok(())
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_hosts: Vec::new(),
            denied_patterns: Vec::new(),
            require_explicit_approval: false,
            approval_flag: None,
        }
    }
}

/// Performance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Rows per page and per restore commit
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl PerformanceConfig {
    fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > 100_000 {
            return Err(format!(
                "performance.batch_size must be between 1 and 100000, got {}",
                self.batch_size
            ));
        }
        Ok(())
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Dump file or direct restore
    #[serde(default)]
    pub mode: OutputMode,

    /// Dump file path; `{database}` is replaced with the database name
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Gzip the dump
    #[serde(default)]
    pub compress: bool,

    /// Empty every table of the target schema before restoring
    #[serde(default)]
    pub reset_target: ResetMode,

    /// Run the restore session with `session_replication_role = replica`
    #[serde(default)]
    pub disable_integrity_checks: bool,
}

impl OutputConfig {
    fn validate(&self) -> Result<(), String> {
        if self.mode == OutputMode::Dump && self.path.trim().is_empty() {
            return Err("output.path is required when output.mode = 'dump'".to_string());
        }
        Ok(())
    }

    /// Resolve the dump path for one database
    pub fn dump_path_for(&self, database: &str) -> String {
        let path = self.path.replace(DATABASE_PLACEHOLDER, database);
        if self.compress && !path.ends_with(".gz") {
            format!("{path}.gz")
        } else {
            path
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            path: default_output_path(),
            compress: false,
            reset_target: ResetMode::default(),
            disable_integrity_checks: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default = "default_true")]
    pub local_enabled: bool,

    /// Local log file path
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,


    /// Directory for run reports
    #[serde(default = "default_report_path")]
    pub report_path: String,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }

        if self.report_path.trim().is_empty() {
            return Err("logging.report_path cannot be empty".to_string());
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: true,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
            report_path: default_report_path(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_secret() -> SecretString {
    crate::config::secret_string(String::new())
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_pg_connection_timeout_seconds() -> u64 {
    30
}

fn default_pg_statement_timeout_seconds() -> u64 {
    300
}

fn default_pg_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    1000
}

fn default_output_path() -> String {
    format!("./output/{DATABASE_PLACEHOLDER}.sql")
}

fn default_rules_file() -> String {
    "rules.toml".to_string()
}

fn default_local_path() -> String {
    "./logs".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

fn default_report_path() -> String {
    DEFAULT_REPORT_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    fn database(host: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            port: 5432,
            username: "reader".to_string(),
            password: secret_string("pw".to_string()),
            read_only: true,
            ssl_mode: "prefer".to_string(),
            verify_server_certificate: true,
            connection_timeout_seconds: 30,
            statement_timeout_seconds: 300,
            max_connections: 4,
        }
    }

    fn config() -> DbmaskConfig {
        DbmaskConfig {
            application: ApplicationConfig::default(),
            source: database("replica.internal"),
            target: None,
            safety: SafetyConfig::default(),
            performance: PerformanceConfig::default(),
            output: OutputConfig::default(),
            rules_file: default_rules_file(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_application_config_validation() {
        let mut config = ApplicationConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_dump_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_restore_requires_target() {
        let mut config = config();
        config.output.mode = OutputMode::Restore;
        let err = config.validate().unwrap_err();
        assert!(err.contains("target configuration is required"));
    }

    #[test]
    fn test_restore_rejects_read_only_target() {
        let mut config = config();
        config.output.mode = OutputMode::Restore;
        config.target = Some(database("uat.internal"));
        assert!(config.validate().unwrap_err().contains("read-only"));

        if let Some(ref mut target) = config.target {
            target.read_only = false;
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = config();
        config.performance.batch_size = 0;
        assert!(config.validate().is_err());
        config.performance.batch_size = 100_001;
        assert!(config.validate().is_err());
        config.performance.batch_size = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = config();
        config.source.ssl_mode = "verify-full".to_string();
        assert!(config.validate().unwrap_err().contains("ssl_mode"));
    }

    #[test]
    fn test_invalid_deny_pattern() {
        let mut config = config();
        config.safety.denied_patterns = vec!["(unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dump_path_for() {
        let mut output = OutputConfig::default();
        assert_eq!(output.dump_path_for("app"), "./output/app.sql");

        output.compress = true;
        assert_eq!(output.dump_path_for("app"), "./output/app.sql.gz");

        output.path = "/tmp/{database}.sql.gz".to_string();
        assert_eq!(output.dump_path_for("app"), "/tmp/app.sql.gz");
    }

    #[test]
    fn test_default_values() {
        let safety = SafetyConfig::default();
        assert!(safety.enabled);
        assert!(!safety.require_explicit_approval);
        assert_eq!(PerformanceConfig::default().batch_size, 1000);
        assert_eq!(OutputConfig::default().mode, OutputMode::Dump);
        assert_eq!(LoggingConfig::default().report_path, "./logs");
    }
}
