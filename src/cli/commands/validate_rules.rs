//! `validate-rules` command

use crate::config::{load_config, load_rules, validate_rules};
use clap::Args;

/// Arguments for the validate-rules command
#[derive(Args, Debug)]
pub struct ValidateRulesArgs {
    /// Rule file to check (defaults to rules_file from the configuration)
    #[arg(short, long)]
    pub rules: Option<String>,
}

impl ValidateRulesArgs {
    /// Execute the validate-rules command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let rules_path = match &self.rules {
            Some(path) => path.clone(),
            None => match load_config(config_path) {
                Ok(config) => config.rules_file,
                Err(e) => {
                    println!("❌ Failed to load configuration: {e}");
                    println!("   Pass --rules to check a rule file directly");
                    return Ok(2);
                }
            },
        };

        tracing::info!(rules_path = %rules_path, "Validating rules");
        println!("🔍 Validating rule file: {rules_path}");
        println!();

        let rules = match load_rules(&rules_path) {
            Ok(r) => r,
            Err(e) => {
                println!("❌ Failed to load rule file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let report = validate_rules(&rules);

        println!("Rules Summary:");
        println!(
            "  Version: {}",
            rules.rules_version.as_deref().unwrap_or("(missing)")
        );
        println!("  Unknown Column Policy: {}", rules.unknown_column_policy);
        println!("  Databases: {}", report.databases);
        println!("  Tables: {}", report.tables);
        println!("  Columns: {}", report.columns);
        println!();

        if !report.warnings.is_empty() {
            println!("⚠️  Warnings:");
            for warning in &report.warnings {
                println!("  - {warning}");
            }
            println!();
        }

        if report.is_valid() {
            println!("✅ Rule file is valid");
            Ok(0)
        } else {
            println!("❌ Errors:");
            for error in &report.errors {
                println!("  - {error}");
            }
            println!();
            Ok(2)
        }
    }
}
