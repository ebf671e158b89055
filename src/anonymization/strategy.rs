//! Rule compilation
//!
//! Strategy names from the rule file are resolved to [`Strategy`] values once, before any
//! row is read. Unknown names are decided here under the unknown-column policy, so the
//! per-row path never sees a raw strategy string.

use crate::anonymization::transformer::DatePrecision;
use crate::config::rules::{AnonymizationRuleSet, ColumnRule, StrategyKind, UnknownColumnPolicy};
use crate::domain::{DbmaskError, Result, SqlIdentifier};
use std::collections::BTreeMap;
use std::fmt;

const DEFAULT_SHOW_LAST: usize = 4;
const DEFAULT_MASK_CHAR: char = 'X';

/// A resolved column strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Keyed hex digest
    Hash,
    /// Deterministic fake "First Last"
    FakeName,
    /// Keep the last `show_last` characters
    Mask { show_last: usize, mask_char: char },
    /// Truncate a date
    Generalize { precision: DatePrecision },
    /// Replace with NULL
    Suppress,
    /// Leave unchanged
    Preserve,
    /// Unrecognised name admitted by a WARN or PRESERVE policy; behaves like `Preserve`
    Unknown(String),
}

impl Strategy {
    /// Name used as the tally key in reports
    pub fn name(&self) -> &str {
        match self {
            Strategy::Hash => "HASH",
            Strategy::FakeName => "FAKE_NAME",
            Strategy::Mask { .. } => "MASK",
            Strategy::Generalize { .. } => "GENERALIZE",
            Strategy::Suppress => "SUPPRESS",
            Strategy::Preserve => "PRESERVE",
            Strategy::Unknown(name) => name,
        }
    }

    /// True for strategies that leave the value untouched
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Strategy::Preserve | Strategy::Unknown(_))
    }

    /// Resolve one column rule
    ///
    /// Returns `None` for an unrecognised strategy name.
    pub fn from_rule(location: &str, rule: &ColumnRule) -> Option<Self> {
        let strategy = match StrategyKind::parse(&rule.strategy)? {
            StrategyKind::Hash => Strategy::Hash,
            StrategyKind::FakeName => Strategy::FakeName,
            StrategyKind::Mask => Strategy::Mask {
                show_last: show_last_option(location, rule),
                mask_char: mask_char_option(location, rule),
            },
            StrategyKind::Generalize => Strategy::Generalize {
                precision: precision_option(location, rule),
            },
            StrategyKind::Suppress => Strategy::Suppress,
            StrategyKind::Preserve => Strategy::Preserve,
        };
        Some(strategy)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn show_last_option(location: &str, rule: &ColumnRule) -> usize {
    match rule.options.get("show_last") {
        None => DEFAULT_SHOW_LAST,
        Some(value) => match value.as_u64().and_then(|v| usize::try_from(v).ok()) {
            Some(n) => n,
            None => {
                tracing::warn!(
                    column = %location,
                    "MASK show_last is not a non-negative integer, using {}",
                    DEFAULT_SHOW_LAST
                );
                DEFAULT_SHOW_LAST
            }
        },
    }
}

fn mask_char_option(location: &str, rule: &ColumnRule) -> char {
    let Some(value) = rule.options.get("mask_char") else {
        return DEFAULT_MASK_CHAR;
    };

    let mut chars = value.as_str().unwrap_or_default().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c,
        _ => {
            tracing::warn!(
                column = %location,
                "MASK mask_char must be a single character, using '{}'",
                DEFAULT_MASK_CHAR
            );
            DEFAULT_MASK_CHAR
        }
    }
}

fn precision_option(location: &str, rule: &ColumnRule) -> DatePrecision {
    match rule.options.get("precision").map(|v| v.as_str()) {
        None => DatePrecision::Year,
        Some(Some(p)) if p.eq_ignore_ascii_case("year") => DatePrecision::Year,
        Some(Some(p)) if p.eq_ignore_ascii_case("month") => DatePrecision::Month,
        Some(_) => {
            tracing::warn!(
                column = %location,
                "GENERALIZE precision must be 'year' or 'month', using 'year'"
            );
            DatePrecision::Year
        }
    }
}

/// One column with its resolved strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledColumn {
    pub name: SqlIdentifier,
    pub strategy: Strategy,
}

/// One table's compiled rules
#[derive(Debug, Clone)]
pub struct CompiledTable {
    pub name: SqlIdentifier,
    pub primary_key: SqlIdentifier,
    /// Sorted by column name
    pub columns: Vec<CompiledColumn>,
}

impl CompiledTable {
    /// Strategy for a column, if the column has a rule
    pub fn strategy_for(&self, column: &str) -> Option<&Strategy> {
        self.columns
            .iter()
            .find(|c| c.name.as_str() == column)
            .map(|c| &c.strategy)
    }

    /// Number of columns whose values are actually changed
    pub fn anonymized_column_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| !c.strategy.is_passthrough())
            .count()
    }
}

/// The rule set with every strategy resolved
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    policy: UnknownColumnPolicy,
    rules_version: Option<String>,
    databases: BTreeMap<String, BTreeMap<String, CompiledTable>>,
}

impl CompiledRuleSet {
    /// Compile a rule set
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Rules`] for an invalid identifier, a missing primary key, or an
    /// unknown strategy name when the policy is FAIL.
    pub fn compile(rules: &AnonymizationRuleSet) -> Result<Self> {
        rules.validate_for_run().map_err(DbmaskError::Rules)?;

        let policy = rules.unknown_column_policy;
        let mut databases = BTreeMap::new();

        for (db_name, db_rules) in &rules.databases {
            let mut tables = BTreeMap::new();

            for (table_name, table_rule) in &db_rules.tables {
                let name = SqlIdentifier::new(table_name.as_str()).map_err(DbmaskError::Rules)?;
                let primary_key =
                    SqlIdentifier::new(table_rule.primary_key.clone().unwrap_or_default())
                        .map_err(DbmaskError::Rules)?;

                let mut columns = Vec::with_capacity(table_rule.columns.len());
                for (column_name, column_rule) in &table_rule.columns {
                    let location = format!("{db_name}.{table_name}.{column_name}");
                    let strategy = match Strategy::from_rule(&location, column_rule) {
                        Some(strategy) => strategy,
                        None => unknown_strategy(policy, &location, &column_rule.strategy)?,
                    };
                    columns.push(CompiledColumn {
                        name: SqlIdentifier::new(column_name.as_str())
                            .map_err(DbmaskError::Rules)?,
                        strategy,
                    });
                }

                tables.insert(
                    table_name.clone(),
                    CompiledTable {
                        name,
                        primary_key,
                        columns,
                    },
                );
            }

            databases.insert(db_name.clone(), tables);
        }

        Ok(Self {
            policy,
            rules_version: rules.rules_version.clone(),
            databases,
        })
    }

    /// Policy for unknown columns
    pub fn policy(&self) -> UnknownColumnPolicy {
        self.policy
    }

    /// Declared rule file version
    pub fn rules_version(&self) -> Option<&str> {
        self.rules_version.as_deref()
    }

    /// Compiled rules for one table
    pub fn table(&self, database: &str, table: &str) -> Option<&CompiledTable> {
        self.databases.get(database)?.get(table)
    }

    /// Database names in sorted order
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    /// Tables of one database in sorted order
    pub fn tables(&self, database: &str) -> impl Iterator<Item = &CompiledTable> {
        self.databases
            .get(database)
            .into_iter()
            .flat_map(|tables| tables.values())
    }

    /// Total number of tables
    pub fn table_count(&self) -> usize {
        self.databases.values().map(BTreeMap::len).sum()
    }
}

fn unknown_strategy(policy: UnknownColumnPolicy, location: &str, name: &str) -> Result<Strategy> {
    match policy {
        UnknownColumnPolicy::Fail => Err(DbmaskError::Rules(format!(
            "Unknown strategy '{name}' for {location} - policy is FAIL"
        ))),
        UnknownColumnPolicy::Warn => {
            tracing::warn!(
                column = %location,
                strategy = %name,
                "Unknown strategy - values will be preserved"
            );
            Ok(Strategy::Unknown(name.to_ascii_uppercase()))
        }
        UnknownColumnPolicy::Preserve => {
            tracing::debug!(column = %location, strategy = %name, "Unknown strategy - preserving");
            Ok(Strategy::Unknown(name.to_ascii_uppercase()))
        }
    }
}
