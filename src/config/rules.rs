//! Anonymization rule file
//!
//! The rule file maps `database -> table -> column` to a strategy name plus options. It is
//! loaded once, before the safety gate runs, and is read-only afterwards. Maps are
//! `BTreeMap`s so databases, tables and columns always enumerate in sorted order.
//!
//! ```toml
//! rules_version = "1.0"
//! schema_hint = "app v42"
//! unknown_column_policy = "FAIL"
//!
//! [databases.app.tables.users]
//! primary_key = "id"
//!
//! [databases.app.tables.users.columns.name]
//! strategy = "FAKE_NAME"
//! pii_level = "HIGH"
//!
//! [databases.app.tables.users.columns.phone]
//! strategy = "MASK"
//! options = { show_last = 4 }
//! ```

use crate::domain::ids::is_valid_identifier;
use crate::domain::{DbmaskError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// What to do with a column the rules and the data disagree on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnknownColumnPolicy {
    /// Abort the run
    #[default]
    #[serde(alias = "fail")]
    Fail,
    /// Log a warning and continue
    #[serde(alias = "warn")]
    Warn,
    /// Continue silently
    #[serde(alias = "preserve")]
    Preserve,
}

impl fmt::Display for UnknownColumnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownColumnPolicy::Fail => write!(f, "FAIL"),
            UnknownColumnPolicy::Warn => write!(f, "WARN"),
            UnknownColumnPolicy::Preserve => write!(f, "PRESERVE"),
        }
    }
}

/// Known strategy names, independent of their options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StrategyKind {
    Hash,
    FakeName,
    Mask,
    Generalize,
    Suppress,
    Preserve,
}

impl StrategyKind {
    /// Resolve a rule-file strategy name (case-insensitive, `HMAC_HASH` aliases `HASH`)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "HASH" | "HMAC_HASH" => Some(StrategyKind::Hash),
            "FAKE_NAME" => Some(StrategyKind::FakeName),
            "MASK" => Some(StrategyKind::Mask),
            "GENERALIZE" => Some(StrategyKind::Generalize),
            "SUPPRESS" => Some(StrategyKind::Suppress),
            "PRESERVE" => Some(StrategyKind::Preserve),
            _ => None,
        }
    }

    /// Canonical name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Hash => "HASH",
            StrategyKind::FakeName => "FAKE_NAME",
            StrategyKind::Mask => "MASK",
            StrategyKind::Generalize => "GENERALIZE",
            StrategyKind::Suppress => "SUPPRESS",
            StrategyKind::Preserve => "PRESERVE",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root of the rule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnonymizationRuleSet {
    /// Rule file format version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<String>,

    /// Free-form description of the schema the rules were written against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hint: Option<String>,

    /// Policy for unknown columns and unknown strategy names
    #[serde(default)]
    pub unknown_column_policy: UnknownColumnPolicy,

    /// database name -> tables
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseRules>,
}

/// Rules for one database
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseRules {
    #[serde(default)]
    pub tables: BTreeMap<String, TableRule>,
}

/// Rules for one table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRule {
    /// Integer key column used for keyset pagination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,

    #[serde(default)]
    pub columns: BTreeMap<String, ColumnRule>,
}

/// Rule for one column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRule {
    pub strategy: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    /// Informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_level: Option<String>,

    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

impl ColumnRule {
    /// Rule with just a strategy name
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            data_type: None,
            pii_level: None,
            options: BTreeMap::new(),
        }
    }

    /// Builder-style option
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

impl AnonymizationRuleSet {
    /// Look up the rule for one table
    pub fn table(&self, database: &str, table: &str) -> Option<&TableRule> {
        self.databases.get(database)?.tables.get(table)
    }

    /// Total number of tables across all databases
    pub fn table_count(&self) -> usize {
        self.databases.values().map(|db| db.tables.len()).sum()
    }

    /// Structural checks that must pass before any connection is opened
    ///
    /// # Errors
    ///
    /// Returns an error if the rule set is empty, a table has no primary key, or any
    /// database, table or column name is not a plain identifier.
    pub fn validate_for_run(&self) -> std::result::Result<(), String> {
        if self.databases.is_empty() {
            return Err("rule set defines no databases".to_string());
        }

        for (db_name, db) in &self.databases {
            if !is_valid_identifier(db_name) {
                return Err(format!("invalid database name '{db_name}'"));
            }
            if db.tables.is_empty() {
                return Err(format!("database '{db_name}' defines no tables"));
            }
            for (table_name, table) in &db.tables {
                if !is_valid_identifier(table_name) {
                    return Err(format!("invalid table name '{db_name}.{table_name}'"));
                }
                match table.primary_key.as_deref() {
                    None | Some("") => {
                        return Err(format!(
                            "table '{db_name}.{table_name}' has no primary_key"
                        ))
                    }
                    Some(pk) if !is_valid_identifier(pk) => {
                        return Err(format!(
                            "table '{db_name}.{table_name}' has invalid primary_key '{pk}'"
                        ))
                    }
                    Some(_) => {}
                }
                if let Some(column) = table.columns.keys().find(|c| !is_valid_identifier(c)) {
                    return Err(format!(
                        "invalid column name '{db_name}.{table_name}.{column}'"
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Load a rule file
///
/// # Errors
///
/// Returns [`DbmaskError::Rules`] if the file is missing, unreadable or not valid TOML.
pub fn load_rules(path: impl AsRef<Path>) -> Result<AnonymizationRuleSet> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(DbmaskError::Rules(format!(
            "Rules file not found: {}",
            path.display()
        )));
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        DbmaskError::Rules(format!(
            "Failed to read rules file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_rules(&contents)
}

/// Parse rule file contents
pub fn parse_rules(contents: &str) -> Result<AnonymizationRuleSet> {
    toml::from_str(contents).map_err(|e| DbmaskError::Rules(format!("Failed to parse rules: {e}")))
}

const PII_LEVELS: [&str; 5] = ["CRITICAL", "HIGH", "MEDIUM", "LOW", "UNKNOWN"];

/// Findings from [`validate_rules`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub databases: usize,
    pub tables: usize,
    pub columns: usize,
}

impl RulesValidationReport {
    /// True when there are no errors (warnings allowed)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Lint a rule set
///
/// Errors make the rule set unusable; warnings point at likely mistakes.
pub fn validate_rules(rules: &AnonymizationRuleSet) -> RulesValidationReport {
    let mut report = RulesValidationReport::default();

    if rules
        .rules_version
        .as_deref()
        .map_or(true, |v| v.trim().is_empty())
    {
        report.errors.push("Missing rules_version".to_string());
    }

    if rules
        .schema_hint
        .as_deref()
        .map_or(true, |v| v.trim().is_empty())
    {
        report
            .warnings
            .push("Missing schema_hint - drift detection will be limited".to_string());
    }

    if rules.databases.is_empty() {
        report.errors.push("No databases defined".to_string());
        return report;
    }

    report.databases = rules.databases.len();

    for (db_name, db) in &rules.databases {
        if !is_valid_identifier(db_name) {
            report
                .errors
                .push(format!("Invalid database name: '{db_name}'"));
        }

        if db.tables.is_empty() {
            report
                .warnings
                .push(format!("Database '{db_name}' has no tables defined"));
        }

        let mut seen_tables = HashSet::new();
        for (table_name, table) in &db.tables {
            report.tables += 1;
            let location = format!("{db_name}.{table_name}");

            if !seen_tables.insert(table_name.to_ascii_lowercase()) {
                report
                    .errors
                    .push(format!("Duplicate table name (case-insensitive): {location}"));
            }

            if !is_valid_identifier(table_name) {
                report
                    .errors
                    .push(format!("Invalid table name: '{location}'"));
            }

            match table.primary_key.as_deref().map(str::trim) {
                None | Some("") => report
                    .errors
                    .push(format!("Missing primary_key for table {location}")),
                Some(pk) if !is_valid_identifier(pk) => report
                    .errors
                    .push(format!("Invalid primary_key '{pk}' for table {location}")),
                Some(_) => {}
            }

            if table.columns.is_empty() {
                report
                    .warnings
                    .push(format!("Table {location} has no columns defined"));
                continue;
            }

            let mut all_preserve = true;
            for (column_name, column) in &table.columns {
                report.columns += 1;
                let column_location = format!("{location}.{column_name}");

                if !is_valid_identifier(column_name) {
                    report
                        .errors
                        .push(format!("Invalid column name: '{column_location}'"));
                }

                let kind = StrategyKind::parse(&column.strategy);
                match kind {
                    None => report.errors.push(format!(
                        "Unknown strategy '{}' for {column_location}",
                        column.strategy
                    )),
                    Some(StrategyKind::Preserve) => {}
                    Some(_) => all_preserve = false,
                }

                if let Some(level) = column.pii_level.as_deref() {
                    if !PII_LEVELS.contains(&level.to_ascii_uppercase().as_str()) {
                        report.warnings.push(format!(
                            "Invalid pii_level '{level}' for {column_location} (expected one of {})",
                            PII_LEVELS.join(", ")
                        ));
                    }
                }

                match kind {
                    Some(StrategyKind::Mask) => {
                        if let Some(show_last) = column.options.get("show_last") {
                            if !show_last.is_u64() {
                                report.warnings.push(format!(
                                    "MASK option show_last should be a non-negative integer for {column_location}"
                                ));
                            }
                        }
                    }
                    Some(StrategyKind::Generalize) => {
                        if let Some(precision) = column.options.get("precision") {
                            if !precision.is_string() {
                                report.warnings.push(format!(
                                    "GENERALIZE option precision should be a string for {column_location}"
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }

            if all_preserve {
                report.warnings.push(format!(
                    "Table {location} has only PRESERVE strategies - no anonymization will occur"
                ));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const RULES: &str = r#"
rules_version = "1.0"
schema_hint = "app"
unknown_column_policy = "warn"

[databases.app.tables.users]
primary_key = "id"

[databases.app.tables.users.columns.name]
strategy = "FAKE_NAME"
pii_level = "HIGH"

[databases.app.tables.users.columns.phone]
strategy = "mask"
options = { show_last = 4 }

[databases.app.tables.audit]
primary_key = "id"

[databases.app.tables.audit.columns.note]
strategy = "PRESERVE"
"#;

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules(RULES).unwrap();
        assert_eq!(rules.rules_version.as_deref(), Some("1.0"));
        assert_eq!(rules.unknown_column_policy, UnknownColumnPolicy::Warn);
        assert_eq!(rules.table_count(), 2);

        let users = rules.table("app", "users").unwrap();
        assert_eq!(users.primary_key.as_deref(), Some("id"));
        assert_eq!(users.columns["phone"].options["show_last"], 4);
        assert!(rules.table("app", "missing").is_none());
    }

    #[test]
    fn test_tables_enumerate_sorted() {
        let rules = parse_rules(RULES).unwrap();
        let tables: Vec<&String> = rules.databases["app"].tables.keys().collect();
        assert_eq!(tables, vec!["audit", "users"]);
    }

    #[test]
    fn test_default_policy_is_fail() {
        let rules = parse_rules("rules_version = \"1\"").unwrap();
        assert_eq!(rules.unknown_column_policy, UnknownColumnPolicy::Fail);
    }

    #[test_case("hash", Some(StrategyKind::Hash) ; "lowercase")]
    #[test_case("HMAC_HASH", Some(StrategyKind::Hash) ; "alias")]
    #[test_case(" Fake_Name ", Some(StrategyKind::FakeName) ; "mixed case padded")]
    #[test_case("TOKENIZE", None ; "unknown")]
    fn test_strategy_kind_parse(name: &str, expected: Option<StrategyKind>) {
        assert_eq!(StrategyKind::parse(name), expected);
    }

    #[test]
    fn test_validate_for_run() {
        let mut rules = parse_rules(RULES).unwrap();
        assert!(rules.validate_for_run().is_ok());

        rules
            .databases
            .get_mut("app")
            .unwrap()
            .tables
            .get_mut("users")
            .unwrap()
            .primary_key = None;
        assert!(rules
            .validate_for_run()
            .unwrap_err()
            .contains("has no primary_key"));

        assert!(AnonymizationRuleSet::default().validate_for_run().is_err());
    }

    #[test]
    fn test_validate_rules_clean_with_preserve_warning() {
        let rules = parse_rules(RULES).unwrap();
        let report = validate_rules(&rules);
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.tables, 2);
        assert_eq!(report.columns, 3);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("app.audit has only PRESERVE")));
    }

    #[test]
    fn test_validate_rules_errors() {
        let rules = parse_rules(
            r#"
[databases.app.tables.users]
[databases.app.tables.users.columns.email]
strategy = "TOKENIZE"
pii_level = "EXTREME"
"#,
        )
        .unwrap();
        let report = validate_rules(&rules);
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e == "Missing rules_version"));
        assert!(report.errors.iter().any(|e| e.contains("Missing primary_key")));
        assert!(report.errors.iter().any(|e| e.contains("Unknown strategy 'TOKENIZE'")));
        assert!(report.warnings.iter().any(|w| w.contains("Invalid pii_level")));
        assert!(report.warnings.iter().any(|w| w.contains("schema_hint")));
    }

    #[test]
    fn test_validate_rules_duplicate_tables() {
        let rules = parse_rules(
            r#"
rules_version = "1"
[databases.app.tables.Users]
primary_key = "id"
[databases.app.tables.users]
primary_key = "id"
"#,
        )
        .unwrap();
        let report = validate_rules(&rules);
        assert!(report.errors.iter().any(|e| e.contains("Duplicate table name")));
    }

    #[test]
    fn test_validate_rules_option_types() {
        let rules = parse_rules(
            r#"
rules_version = "1"
schema_hint = "x"
[databases.app.tables.users]
primary_key = "id"
[databases.app.tables.users.columns.phone]
strategy = "MASK"
options = { show_last = "four" }
[databases.app.tables.users.columns.dob]
strategy = "GENERALIZE"
options = { precision = 4 }
"#,
        )
        .unwrap();
        let report = validate_rules(&rules);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("show_last")));
        assert!(report.warnings.iter().any(|w| w.contains("precision")));
    }

    #[test]
    fn test_load_rules_missing_file() {
        let err = load_rules("does-not-exist.toml").unwrap_err();
        assert!(matches!(err, DbmaskError::Rules(_)));
    }
}
