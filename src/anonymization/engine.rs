//! Rule engine
//!
//! [`AnonymizationEngine::anonymize_batch`] mutates a page of rows in place according to the
//! compiled rules and returns how many values each strategy touched. The engine keeps no
//! state between calls; the caller merges the returned [`StrategyTally`] values.

use crate::anonymization::strategy::{CompiledRuleSet, Strategy};
use crate::anonymization::transformer::{mask_keep_last, DeterministicTransformer};
use crate::config::rules::UnknownColumnPolicy;
use crate::domain::{DbmaskError, Result, RowBatch, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-strategy value counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyTally(BTreeMap<String, u64>);

impl StrategyTally {
    /// Empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one value for `strategy`
    pub fn record(&mut self, strategy: &str) {
        *self.0.entry(strategy.to_string()).or_insert(0) += 1;
    }

    /// Add another tally into this one
    pub fn merge(&mut self, other: &StrategyTally) {
        for (strategy, count) in &other.0 {
            *self.0.entry(strategy.clone()).or_insert(0) += count;
        }
    }

    /// Count for one strategy
    pub fn get(&self, strategy: &str) -> u64 {
        self.0.get(strategy).copied().unwrap_or(0)
    }

    /// Sum over all strategies
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying counts
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.0
    }
}

/// Applies compiled column rules to row batches
#[derive(Debug, Clone)]
pub struct AnonymizationEngine {
    transformer: DeterministicTransformer,
    rules: CompiledRuleSet,
}

impl AnonymizationEngine {
    pub fn new(transformer: DeterministicTransformer, rules: CompiledRuleSet) -> Self {
        Self { transformer, rules }
    }

    /// The rules this engine applies
    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    /// Anonymize a batch in place
    ///
    /// For each row and each configured column: a column absent from the row is handled by
    /// the unknown-column policy, NULL values are skipped, everything else is dispatched to
    /// the column's strategy and counted.
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::UnknownColumn`] when a configured column is absent and the
    /// policy is FAIL.
    pub fn anonymize_batch(
        &self,
        database: &str,
        table: &str,
        rows: &mut RowBatch,
    ) -> Result<StrategyTally> {
        let mut tally = StrategyTally::new();

        let Some(table_rules) = self.rules.table(database, table) else {
            tracing::warn!(database, table, "No rules found for table");
            return Ok(tally);
        };

        for row in rows.iter_mut() {
            for column in &table_rules.columns {
                let Some(value) = row.get_mut(column.name.as_str()) else {
                    self.handle_absent_column(database, table, column.name.as_str())?;
                    continue;
                };

                if value.is_null() {
                    continue;
                }

                *value = self.apply(&column.strategy, value);
                tally.record(column.strategy.name());
            }
        }

        Ok(tally)
    }

    fn apply(&self, strategy: &Strategy, value: &Value) -> Value {
        if strategy.is_passthrough() {
            return value.clone();
        }

        let Some(text) = value.to_text() else {
            return Value::Null;
        };

        match strategy {
            Strategy::Hash => Value::Text(self.transformer.hash_id(&text)),
            Strategy::FakeName => Value::Text(self.transformer.fake_name(&text)),
            Strategy::Mask {
                show_last,
                mask_char,
            } => Value::Text(mask_keep_last(&text, *show_last, *mask_char)),
            Strategy::Generalize { precision } => {
                Value::Text(self.transformer.generalize_date_to(&text, *precision))
            }
            Strategy::Suppress => Value::Null,
            Strategy::Preserve | Strategy::Unknown(_) => value.clone(),
        }
    }

    fn handle_absent_column(&self, database: &str, table: &str, column: &str) -> Result<()> {
        match self.rules.policy() {
            UnknownColumnPolicy::Fail => Err(DbmaskError::UnknownColumn {
                database: database.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            }),
            UnknownColumnPolicy::Warn => {
                tracing::warn!(database, table, column, "Configured column missing from row");
                Ok(())
            }
            UnknownColumnPolicy::Preserve => {
                tracing::debug!(database, table, column, "Configured column missing from row");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::parse_rules;
    use crate::domain::RowRecord;

    const SECRET: &str = "test-secret-key-32-characters-long-123456";

    fn engine(policy: &str) -> AnonymizationEngine {
        let rules = parse_rules(&format!(
            r#"
rules_version = "1"
unknown_column_policy = "{policy}"
[databases.app.tables.users]
primary_key = "id"
[databases.app.tables.users.columns.email]
strategy = "HASH"
[databases.app.tables.users.columns.note]
strategy = "SUPPRESS"
[databases.app.tables.users.columns.city]
strategy = "PRESERVE"
[databases.app.tables.users.columns.dob]
strategy = "GENERALIZE"
"#
        ))
        .unwrap();
        AnonymizationEngine::new(
            DeterministicTransformer::new(SECRET).unwrap(),
            CompiledRuleSet::compile(&rules).unwrap(),
        )
    }

    fn row() -> RowRecord {
        RowRecord::new()
            .with("id", 1i64)
            .with("email", "a@example.com")
            .with("note", "free text")
            .with("city", "Pune")
            .with("dob", "1985-05-15")
    }

    #[test]
    fn test_strategies_applied() {
        let engine = engine("FAIL");
        let mut batch = RowBatch::from(vec![row()]);
        let tally = engine.anonymize_batch("app", "users", &mut batch).unwrap();

        let out = &batch.rows()[0];
        assert_eq!(out.get("id"), Some(&Value::Int(1)));
        assert_eq!(out.get("note"), Some(&Value::Null));
        assert_eq!(out.get("city"), Some(&Value::from("Pune")));
        assert_eq!(out.get("dob"), Some(&Value::from("1985")));
        match out.get("email") {
            Some(Value::Text(hash)) => assert_eq!(hash.len(), 64),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(tally.get("HASH"), 1);
        assert_eq!(tally.get("PRESERVE"), 1);
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn test_nulls_untouched_and_uncounted() {
        let engine = engine("FAIL");
        let mut r = row();
        r.set("email", Value::Null);
        let mut batch = RowBatch::from(vec![r]);
        let tally = engine.anonymize_batch("app", "users", &mut batch).unwrap();

        assert_eq!(batch.rows()[0].get("email"), Some(&Value::Null));
        assert_eq!(tally.get("HASH"), 0);
    }

    #[test]
    fn test_missing_table_rules_is_noop() {
        let engine = engine("FAIL");
        let mut batch = RowBatch::from(vec![row()]);
        let before = batch.clone();
        let tally = engine.anonymize_batch("app", "orders", &mut batch).unwrap();
        assert!(tally.is_empty());
        assert_eq!(batch, before);
    }

    #[test]
    fn test_absent_column_with_preserve_policy() {
        let engine = engine("PRESERVE");
        let mut batch = RowBatch::from(vec![RowRecord::new().with("id", 1i64)]);
        let tally = engine.anonymize_batch("app", "users", &mut batch).unwrap();
        assert!(tally.is_empty());
        assert_eq!(batch.rows()[0].len(), 1);
    }

    #[test]
    fn test_integer_values_use_text_form() {
        let engine = engine("FAIL");
        let mut r = row();
        r.set("email", Value::Int(12345));
        let mut batch = RowBatch::from(vec![r]);
        engine.anonymize_batch("app", "users", &mut batch).unwrap();

        let direct = DeterministicTransformer::new(SECRET).unwrap().hash_id("12345");
        assert_eq!(batch.rows()[0].get("email"), Some(&Value::Text(direct)));
    }

    #[test]
    fn test_tally_merge() {
        let mut a = StrategyTally::new();
        a.record("HASH");
        a.record("MASK");
        let mut b = StrategyTally::new();
        b.record("HASH");
        a.merge(&b);
        assert_eq!(a.get("HASH"), 2);
        assert_eq!(a.get("MASK"), 1);
        assert_eq!(a.total(), 3);
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"HASH":2,"MASK":1}"#);
    }
}
