//! `run` command
//!
//! Loads configuration and rules, confirms with the operator, runs the pipeline and prints
//! the report summary. The exit code comes from the run outcome.
//!
//! Every run that gets past argument parsing leaves exactly one report behind, including
//! runs whose configuration or rules fail to load. Those land in `logging.report_path`
//! (read from the raw file when the configuration does not validate), or in `./logs` when
//! no report path can be found at all.

use crate::config::loader::report_path_hint;
use crate::config::{load_config, load_rules, secret_string_opt, SECRET_ENV_VAR};
use crate::core::orchestrator::{Orchestrator, RunOptions, RunOutcome};
use crate::core::report::RunStatus;
use crate::domain::DbmaskError;
use clap::Args;
use std::path::Path;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Approval token, compared against safety.approval_flag
    #[arg(long, value_name = "TOKEN", env = "DBMASK_APPROVAL")]
    pub approve: Option<String>,

    /// Validate configuration, rules and safety checks without moving data
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl RunArgs {
    /// Execute the run command
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// The process exit code: 0 on success, otherwise the code of the error that ended the
    /// run (see [`DbmaskError::exit_code`]).
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Starting run command");
        let config_file = Path::new(config_path);

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                return Ok(setup_failed(
                    report_path_hint(config_file),
                    Some(config_file),
                    None,
                    e,
                ));
            }
        };

        let rules_file = Path::new(&config.rules_file);
        let rules = match load_rules(rules_file) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Failed to load rules: {e}");
                return Ok(setup_failed(
                    &config.logging.report_path,
                    Some(config_file),
                    Some(rules_file),
                    e,
                ));
            }
        };

        let dry_run = self.dry_run || config.application.dry_run;
        if dry_run {
            println!("🔍 DRY RUN MODE - No data will be read or written");
            println!();
        }

        if !self.yes && !dry_run {
            println!("Run Configuration:");
            println!("  Source: {}:{}", config.source.host, config.source.port);
            println!("  Output: {}", config.output.mode);
            match &config.target {
                Some(target) if config.output.mode == crate::config::OutputMode::Restore => {
                    println!("  Target: {}:{}", target.host, target.port);
                }
                _ => println!("  Path: {}", config.output.path),
            }
            println!("  Databases: {}", rules.databases.len());
            println!("  Tables: {}", rules.table_count());
            println!("  Batch size: {}", config.performance.batch_size);
            println!();
            print!("Proceed with anonymization? [y/N]: ");
            use std::io::{self, Write};
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;

            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Run cancelled.");
                return Ok(0);
            }
        }

        let options = RunOptions {
            approval: self.approve.clone(),
            dry_run: self.dry_run,
            secret: secret_string_opt(std::env::var(SECRET_ENV_VAR).ok()),
        };

        let rules_path = config.rules_file.clone();
        let report_dir = config.logging.report_path.clone();
        let orchestrator = match Orchestrator::from_config(config, rules) {
            Ok(o) => o.with_source_files(config_file, Path::new(&rules_path)),
            Err(e) => {
                eprintln!("Failed to initialize run: {e}");
                return Ok(setup_failed(
                    &report_dir,
                    Some(config_file),
                    Some(Path::new(&rules_path)),
                    e,
                ));
            }
        };

        println!("🚀 Starting anonymization...");
        println!();

        let outcome = orchestrator.run(&options).await;
        let report = &outcome.report;

        println!();
        println!("📊 Run Summary:");
        println!("  Execution ID: {}", report.execution_id);
        println!("  Status: {:?}", report.status);
        println!("  Tables: {}", report.tables.len());
        println!("  Rows: {}", report.total_rows_processed());
        println!(
            "  Duration: {:.2}s",
            report.total_duration_ms.unwrap_or_default() as f64 / 1000.0
        );
        if let Some(path) = &outcome.report_path {
            println!("  Report: {}", path.display());
        }
        println!();

        if !report.errors.is_empty() {
            println!("⚠️  Errors encountered:");
            for (context, message) in &report.errors {
                println!("  - {context}: {message}");
            }
            println!();
        }

        match (&outcome.result, report.status) {
            (Ok(()), RunStatus::DryRunSuccess) => println!("✅ Dry run passed"),
            (Ok(()), _) => println!("✅ Anonymization completed successfully!"),
            (Err(_), _) => {
                if let Some(message) = &report.error_message {
                    eprintln!("❌ Run failed: {message}");
                }
            }
        }

        Ok(outcome.exit_code())
    }
}

/// Write the failed-run report for a setup error and return its exit code
fn setup_failed(
    report_dir: impl AsRef<Path>,
    config_path: Option<&Path>,
    rules_path: Option<&Path>,
    error: DbmaskError,
) -> i32 {
    let outcome = RunOutcome::setup_failure(report_dir, config_path, rules_path, error);
    if let Some(path) = &outcome.report_path {
        eprintln!("Report: {}", path.display());
    }
    outcome.exit_code()
}
