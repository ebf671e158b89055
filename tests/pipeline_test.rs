//! End-to-end runs of the orchestrator over an in-memory source and sink

mod common;

use common::{config, config_with, rules, secret, MemorySinkFactory, MemorySource, MemoryTable};
use dbmask::core::{Orchestrator, RunOptions, RunStatus};
use dbmask::domain::{DbmaskError, RowRecord, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const RULES: &str = r#"
rules_version = "1.0"
unknown_column_policy = "FAIL"

[databases.app.tables.users]
primary_key = "id"

[databases.app.tables.users.columns.name]
strategy = "FAKE_NAME"

[databases.app.tables.users.columns.phone]
strategy = "MASK"
options = { show_last = 4 }

[databases.app.tables.visits]
primary_key = "id"

[databases.app.tables.visits.columns.visited_on]
strategy = "GENERALIZE"
"#;

fn users() -> MemoryTable {
    MemoryTable::new(
        &["id", "name", "phone"],
        vec![
            RowRecord::new()
                .with("id", 1i64)
                .with("name", "Rajesh")
                .with("phone", "9876543210"),
            RowRecord::new()
                .with("id", 2i64)
                .with("name", "Priya")
                .with("phone", "9876543212"),
            RowRecord::new()
                .with("id", 3i64)
                .with("name", "Anil")
                .with("phone", Value::Null),
        ],
    )
}

fn visits() -> MemoryTable {
    MemoryTable::new(
        &["id", "visited_on"],
        vec![RowRecord::new()
            .with("id", 10i64)
            .with("visited_on", "2024-03-09")],
    )
}

fn run_options() -> RunOptions {
    RunOptions {
        secret: Some(secret()),
        ..RunOptions::default()
    }
}

fn read_report(path: &std::path::Path) -> (String, serde_json::Value) {
    let raw = fs::read_to_string(path).unwrap();
    let json = serde_json::from_str(&raw).unwrap();
    (raw, json)
}

#[tokio::test]
async fn test_successful_run_writes_every_table_and_report() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new()
        .with_table("app", "users", users())
        .with_table("app", "visits", visits());
    let sinks = Arc::new(MemorySinkFactory::new());

    let orchestrator = Orchestrator::new(
        config(dir.path(), 2),
        rules(RULES),
        Arc::new(source),
        sinks.clone(),
    );
    let outcome = orchestrator.run(&run_options()).await;

    assert!(outcome.is_success(), "{:?}", outcome.result.as_ref().err());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.report.status, RunStatus::Success);
    assert_eq!(outcome.report.total_rows_processed(), 4);

    let log = sinks.log("app");
    let log = log.lock().unwrap();
    assert!(log.success && log.closed);
    assert_eq!(log.prepared, vec!["users", "visits"]);

    // Three users at batch size 2 is two pages
    assert_eq!(log.batches.iter().filter(|(t, _, _)| t == "users").count(), 2);

    let users = log.rows("users");
    assert_eq!(users.len(), 3);
    assert_eq!(users[0].get("phone"), Some(&Value::from("XXXXXX3210")));
    assert_eq!(users[1].get("phone"), Some(&Value::from("XXXXXX3212")));
    assert_eq!(users[2].get("phone"), Some(&Value::Null));
    assert_ne!(users[0].get("name"), Some(&Value::from("Rajesh")));
    assert_eq!(log.rows("visits")[0].get("visited_on"), Some(&Value::from("2024")));

    let (raw, json) = read_report(outcome.report_path.as_ref().unwrap());
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["rules_version"], "1.0");
    assert_eq!(json["tables"][0]["table_name"], "app.users");
    assert_eq!(json["tables"][0]["rows_processed"], 3);
    assert_eq!(json["tables"][0]["strategy_counts"]["FAKE_NAME"], 3);
    assert_eq!(json["tables"][0]["strategy_counts"]["MASK"], 2);
    assert!(!raw.contains("Rajesh"));
    assert!(!raw.contains("9876543210"));
}

#[tokio::test]
async fn test_same_input_same_output_across_runs() {
    let mut outputs = Vec::new();
    for _ in 0..2 {
        let dir = TempDir::new().unwrap();
        let sinks = Arc::new(MemorySinkFactory::new());
        let orchestrator = Orchestrator::new(
            config(dir.path(), 1000),
            rules(RULES),
            Arc::new(
                MemorySource::new()
                    .with_table("app", "users", users())
                    .with_table("app", "visits", visits()),
            ),
            sinks.clone(),
        );
        assert!(orchestrator.run(&run_options()).await.is_success());
        let rows = sinks.log("app").lock().unwrap().rows("users");
        outputs.push(rows);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[tokio::test]
async fn test_dry_run_reads_nothing() {
    let dir = TempDir::new().unwrap();
    let source = MemorySource::new().with_table("app", "users", users());
    let fetches = source.fetches.clone();
    let sinks = Arc::new(MemorySinkFactory::new());

    let orchestrator = Orchestrator::new(
        config(dir.path(), 100),
        rules(RULES),
        Arc::new(source),
        sinks.clone(),
    );
    let outcome = orchestrator
        .run(&RunOptions {
            dry_run: true,
            ..RunOptions::default()
        })
        .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.report.status, RunStatus::DryRunSuccess);
    assert_eq!(sinks.opened(), 0);
    assert!(fetches.lock().unwrap().is_empty());

    let (_, json) = read_report(outcome.report_path.as_ref().unwrap());
    assert_eq!(json["status"], "DRY_RUN_SUCCESS");
}

#[tokio::test]
async fn test_table_failure_closes_sink_and_sanitizes_report() {
    let dir = TempDir::new().unwrap();
    let failing = users().failing(
        "insert failed at VALUES (1, 'Rajesh Kumar') DETAIL: Key (phone)=(9876543210)",
    );
    let source = MemorySource::new()
        .with_table("app", "users", failing)
        .with_table("app", "visits", visits());
    let fetches = source.fetches.clone();
    let sinks = Arc::new(MemorySinkFactory::new());

    let orchestrator = Orchestrator::new(
        config(dir.path(), 100),
        rules(RULES),
        Arc::new(source),
        sinks.clone(),
    );
    let outcome = orchestrator.run(&run_options()).await;

    assert!(matches!(outcome.result, Err(DbmaskError::Database(_))));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(outcome.report.status, RunStatus::Failed);

    let log = sinks.log("app");
    let log = log.lock().unwrap();
    assert!(log.closed);
    assert!(!log.success);

    // The run stops at the first failing table
    assert!(fetches.lock().unwrap().iter().all(|(t, _, _)| t == "users"));

    let (raw, json) = read_report(outcome.report_path.as_ref().unwrap());
    assert_eq!(json["status"], "FAILED");
    assert!(json["errors"]["app.users"].is_string());
    assert!(json["tables"][0]["error"].is_string());
    assert!(!raw.contains("Rajesh"));
    assert!(!raw.contains("9876543210"));
}

#[tokio::test]
async fn test_unmapped_source_column_fails_under_fail_policy() {
    let dir = TempDir::new().unwrap();
    let mut table = users();
    table
        .columns
        .push(dbmask::adapters::database::traits::SourceColumn::new("email", "text", true));
    let sinks = Arc::new(MemorySinkFactory::new());

    let orchestrator = Orchestrator::new(
        config(dir.path(), 100),
        rules(RULES),
        Arc::new(
            MemorySource::new()
                .with_table("app", "users", table)
                .with_table("app", "visits", visits()),
        ),
        sinks.clone(),
    );
    let outcome = orchestrator.run(&run_options()).await;

    match outcome.result {
        Err(DbmaskError::UnknownColumn { column, .. }) => assert_eq!(column, "email"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_table_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        config(dir.path(), 100),
        rules(RULES),
        Arc::new(MemorySource::new()),
        Arc::new(MemorySinkFactory::new()),
    );
    let outcome = orchestrator.run(&run_options()).await;
    assert!(matches!(outcome.result, Err(DbmaskError::Validation(_))));
}

#[tokio::test]
async fn test_safety_denial_stops_before_any_output() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(dir.path(), 100);
    cfg.source.host = "db-prod-01.internal".to_string();
    let sinks = Arc::new(MemorySinkFactory::new());

    let orchestrator = Orchestrator::new(
        cfg,
        rules(RULES),
        Arc::new(MemorySource::new().with_table("app", "users", users())),
        sinks.clone(),
    );
    let outcome = orchestrator.run(&run_options()).await;

    assert!(matches!(outcome.result, Err(DbmaskError::Safety(_))));
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(sinks.opened(), 0);
    assert!(outcome.report_path.is_some());
}

#[tokio::test]
async fn test_approval_required_for_allowlisted_host() {
    let dir = TempDir::new().unwrap();
    let cfg = config_with(
        dir.path(),
        100,
        r#"
[safety]
allowed_hosts = ["replica.internal"]
require_explicit_approval = true
approval_flag = "X"
"#,
    );
    let make = || {
        Orchestrator::new(
            cfg.clone(),
            rules(RULES),
            Arc::new(
                MemorySource::new()
                    .with_table("app", "users", users())
                    .with_table("app", "visits", visits()),
            ),
            Arc::new(MemorySinkFactory::new()),
        )
    };

    let denied = make().run(&run_options()).await;
    assert_eq!(denied.exit_code(), 3);

    let approved = make()
        .run(&RunOptions {
            approval: Some("X".to_string()),
            ..run_options()
        })
        .await;
    assert!(approved.is_success());
}

#[tokio::test]
async fn test_missing_secret_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Orchestrator::new(
        config(dir.path(), 100),
        rules(RULES),
        Arc::new(MemorySource::new().with_table("app", "users", users())),
        Arc::new(MemorySinkFactory::new()),
    );
    let outcome = orchestrator.run(&RunOptions::default()).await;

    assert!(matches!(outcome.result, Err(DbmaskError::Configuration(_))));
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.report.status, RunStatus::Failed);
}
