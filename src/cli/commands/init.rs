//! `init` command
//!
//! Writes a sample `dbmask.toml` and a sample `rules.toml` next to it.

use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};

const RULES_FILE_NAME: &str = "rules.toml";

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path of the configuration file to create
    #[arg(short, long, default_value = "dbmask.toml")]
    pub output: String,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        let config_path = PathBuf::from(&self.output);
        let rules_path = rules_path_for(&config_path);
        tracing::info!(output = %config_path.display(), "Initializing configuration");

        println!("📝 Initializing dbmask configuration");
        println!();

        for path in [&config_path, &rules_path] {
            if path.exists() && !self.force {
                println!("❌ File already exists: {}", path.display());
                println!("   Use --force to overwrite");
                return Ok(2);
            }
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let written = fs::write(&config_path, sample_config())
            .and_then(|()| fs::write(&rules_path, sample_rules()));

        match written {
            Ok(()) => {
                println!("✅ Configuration file created: {}", config_path.display());
                println!("✅ Rule file created: {}", rules_path.display());
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your connection settings", config_path.display());
                println!("  2. Describe every sensitive column in {}", rules_path.display());
                println!("  3. Create a .env file with your credentials:");
                println!("     - DBMASK_SOURCE_PASSWORD");
                println!("     - ANONYMIZATION_SECRET (at least 32 characters)");
                println!("  4. Check the rules: dbmask validate-rules");
                println!("  5. Rehearse: dbmask run --dry-run");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }
}

fn rules_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.join(RULES_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(RULES_FILE_NAME))
}

fn sample_config() -> &'static str {
    r#"# dbmask configuration
#
# ${VAR} placeholders are replaced from the environment (or .env) before parsing.
# DBMASK_<SECTION>_<KEY> environment variables override values in this file.

rules_file = "rules.toml"

[application]
log_level = "info"
dry_run = false

# Source database (read-only replica recommended)
[source]
host = "replica.internal"
port = 5432
username = "dbmask_reader"
password = "${DBMASK_SOURCE_PASSWORD}"
read_only = true
ssl_mode = "prefer"               # disable | prefer | require
verify_server_certificate = true
connection_timeout_seconds = 30
statement_timeout_seconds = 300
max_connections = 4

# Target database, only used when output.mode = "restore"
# [target]
# host = "uat-db.internal"
# username = "dbmask_writer"
# password = "${DBMASK_TARGET_PASSWORD}"
# read_only = false

[safety]
enabled = true
# Hosts listed here skip the production name patterns. Globs are allowed: "*.uat.internal"
allowed_hosts = ["replica.internal"]
# Extra deny patterns (regular expressions, case-insensitive, full match)
denied_patterns = []
require_explicit_approval = false
# approval_flag = "${DBMASK_APPROVAL_FLAG}"

[performance]
batch_size = 1000

[output]
mode = "dump"                     # dump | restore
path = "./output/{database}.sql"
compress = false
reset_target = "none"              # none | truncate | delete (restore mode only)
disable_integrity_checks = false

[logging]
local_enabled = true
local_path = "./logs"
local_rotation = "daily"          # hourly | daily | never
report_path = "./logs"
"#
}

fn sample_rules() -> &'static str {
    r#"# dbmask anonymization rules
#
# Strategies: HASH, FAKE_NAME, MASK, GENERALIZE, SUPPRESS, PRESERVE
# unknown_column_policy: FAIL | WARN | PRESERVE

rules_version = "1.0"
schema_hint = "app-v1"
unknown_column_policy = "FAIL"

[databases.app.tables.users]
primary_key = "id"

[databases.app.tables.users.columns.name]
strategy = "FAKE_NAME"
data_type = "varchar"
pii_level = "HIGH"

[databases.app.tables.users.columns.email]
strategy = "HASH"
data_type = "varchar"
pii_level = "HIGH"

[databases.app.tables.users.columns.phone]
strategy = "MASK"
data_type = "varchar"
pii_level = "HIGH"
options = { show_last = 4 }

[databases.app.tables.users.columns.date_of_birth]
strategy = "GENERALIZE"
data_type = "date"
pii_level = "MEDIUM"
options = { precision = "year" }

[databases.app.tables.users.columns.created_at]
strategy = "PRESERVE"
data_type = "timestamp"
pii_level = "LOW"
"#
}
