//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{DbmaskConfig, OutputMode, DEFAULT_REPORT_PATH};
use super::secret::secret_string;
use crate::domain::errors::DbmaskError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Environment variable holding the transformer secret
pub const SECRET_ENV_VAR: &str = "ANONYMIZATION_SECRET";

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into DbmaskConfig
/// 4. Applies environment variable overrides (DBMASK_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - TOML parsing fails
/// - A referenced environment variable is not set
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use dbmask::config::loader::load_config;
///
/// let config = load_config("dbmask.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<DbmaskConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(DbmaskError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        DbmaskError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: DbmaskConfig = toml::from_str(&contents)
        .map_err(|e| DbmaskError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        DbmaskError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Best-effort report directory for a configuration that may not load
///
/// Used when [`load_config`] failed but the run still needs somewhere to put its report.
/// `DBMASK_LOGGING_REPORT_PATH` wins; otherwise `logging.report_path` is read from the raw
/// TOML (no substitution, no validation); otherwise [`DEFAULT_REPORT_PATH`].
pub fn report_path_hint(path: impl AsRef<Path>) -> String {
    if let Ok(val) = std::env::var("DBMASK_LOGGING_REPORT_PATH") {
        return val;
    }

    fs::read_to_string(path.as_ref())
        .ok()
        .and_then(|contents| contents.parse::<toml::Table>().ok())
        .and_then(|table| {
            table
                .get("logging")?
                .get("report_path")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_REPORT_PATH.to_string())
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex"))
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
pub(crate) fn substitute_env_vars(input: &str) -> Result<String> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(DbmaskError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

/// Split a comma-separated list, trimming entries and dropping empty ones
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        DbmaskError::Configuration(format!("Invalid value for {name}: '{value}'"))
    })
}

/// Applies environment variable overrides using DBMASK_* prefix
///
/// Variables follow the pattern `DBMASK_<SECTION>_<KEY>`, for example
/// `DBMASK_SOURCE_HOST` or `DBMASK_PERFORMANCE_BATCH_SIZE`.
fn apply_env_overrides(config: &mut DbmaskConfig) -> Result<()> {
    // Application overrides
    if let Ok(val) = std::env::var("DBMASK_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Ok(val) = std::env::var("DBMASK_APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_env("DBMASK_APPLICATION_DRY_RUN", &val)?;
    }

    // Source overrides
    if let Ok(val) = std::env::var("DBMASK_SOURCE_HOST") {
        config.source.host = val;
    }
    if let Ok(val) = std::env::var("DBMASK_SOURCE_PORT") {
        config.source.port = parse_env("DBMASK_SOURCE_PORT", &val)?;
    }
    if let Ok(val) = std::env::var("DBMASK_SOURCE_USERNAME") {
        config.source.username = val;
    }
    if let Ok(val) = std::env::var("DBMASK_SOURCE_PASSWORD") {
        config.source.password = secret_string(val);
    }

    // Target overrides (only if a target is configured)
    if let Some(ref mut target) = config.target {
        if let Ok(val) = std::env::var("DBMASK_TARGET_HOST") {
            target.host = val;
        }
        if let Ok(val) = std::env::var("DBMASK_TARGET_PORT") {
            target.port = parse_env("DBMASK_TARGET_PORT", &val)?;
        }
        if let Ok(val) = std::env::var("DBMASK_TARGET_USERNAME") {
            target.username = val;
        }
        if let Ok(val) = std::env::var("DBMASK_TARGET_PASSWORD") {
            target.password = secret_string(val);
        }
    }

    // Safety overrides
    if let Ok(val) = std::env::var("DBMASK_SAFETY_ENABLED") {
        config.safety.enabled = parse_env("DBMASK_SAFETY_ENABLED", &val)?;
    }
    if let Ok(val) = std::env::var("DBMASK_SAFETY_ALLOWED_HOSTS") {
        config.safety.allowed_hosts = split_list(&val);
    }
    if let Ok(val) = std::env::var("DBMASK_SAFETY_DENIED_PATTERNS") {
        config.safety.denied_patterns = split_list(&val);
    }
    if let Ok(val) = std::env::var("DBMASK_SAFETY_REQUIRE_EXPLICIT_APPROVAL") {
        config.safety.require_explicit_approval =
            parse_env("DBMASK_SAFETY_REQUIRE_EXPLICIT_APPROVAL", &val)?;
    }
    if let Ok(val) = std::env::var("DBMASK_SAFETY_APPROVAL_FLAG") {
        config.safety.approval_flag = Some(secret_string(val));
    }

    // Performance overrides
    if let Ok(val) = std::env::var("DBMASK_PERFORMANCE_BATCH_SIZE") {
        config.performance.batch_size = parse_env("DBMASK_PERFORMANCE_BATCH_SIZE", &val)?;
    }

    // Output overrides
    if let Ok(val) = std::env::var("DBMASK_OUTPUT_MODE") {
        config.output.mode = match val.trim().to_ascii_lowercase().as_str() {
            "dump" => OutputMode::Dump,
            "restore" => OutputMode::Restore,
            _ => {
                return Err(DbmaskError::Configuration(format!(
                    "Invalid value for DBMASK_OUTPUT_MODE: '{val}'"
                )))
            }
        };
    }
    if let Ok(val) = std::env::var("DBMASK_OUTPUT_PATH") {
        config.output.path = val;
    }
    if let Ok(val) = std::env::var("DBMASK_OUTPUT_COMPRESS") {
        config.output.compress = parse_env("DBMASK_OUTPUT_COMPRESS", &val)?;
    }

    if let Ok(val) = std::env::var("DBMASK_RULES_FILE") {
        config.rules_file = val;
    }

    // Logging overrides
    if let Ok(val) = std::env::var("DBMASK_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_env("DBMASK_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Ok(val) = std::env::var("DBMASK_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Ok(val) = std::env::var("DBMASK_LOGGING_REPORT_PATH") {
        config.logging.report_path = val;
    }

    Ok(())
}
