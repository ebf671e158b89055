//! `validate-config` command

use crate::config::load_config;
use crate::config::OutputMode;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates after parsing
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!(
            "  Source: {}:{} (user: {}, read_only: {})",
            config.source.host, config.source.port, config.source.username, config.source.read_only
        );
        println!("  Output Mode: {}", config.output.mode);
        match config.output.mode {
            OutputMode::Dump => {
                println!("  Output Path: {}", config.output.path);
                println!("  Compress: {}", config.output.compress);
            }
            OutputMode::Restore => {
                if let Some(target) = &config.target {
                    println!("  Target: {}:{}", target.host, target.port);
                }
                println!("  Reset Target: {}", config.output.reset_target);
            }
        }
        println!("  Batch Size: {}", config.performance.batch_size);
        println!("  Rules File: {}", config.rules_file);
        println!(
            "  Safety: {} (allowlist: {}, custom deny patterns: {}, approval required: {})",
            if config.safety.enabled { "enabled" } else { "DISABLED" },
            config.safety.allowed_hosts.len(),
            config.safety.denied_patterns.len(),
            config.safety.require_explicit_approval
        );
        println!("  Report Path: {}", config.logging.report_path);
        println!();
        Ok(0)
    }
}
