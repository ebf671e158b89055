//! Error message sanitizer
//!
//! Database errors can echo row values back: constraint details, bad input literals, enum
//! and range violations, the failing statement. Every error string passes through
//! [`sanitize_error`] before it is logged at error level or recorded in the run report.
//!
//! PostgreSQL double-quotes both identifiers and values in its messages. A double-quoted
//! fragment is kept only when it follows an object keyword (`relation "users"`,
//! `constraint "users_pkey"`); every other one is treated as a value and redacted.

use regex::{Captures, Regex};
use std::sync::OnceLock;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

/// Words PostgreSQL puts in front of a quoted object name
const IDENTIFIER_KEYWORDS: &str =
    "relation|constraint|column|table|index|schema|database|role|function|sequence|view|trigger|operator|extension|type";

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"(?s)DETAIL:.*$", "DETAIL: [redacted]"),
            (r"Key \(([^)]*)\)=\([^)]*\)", "Key ($1)=(...)"),
            (r"VALUES\s*\((?:'(?:[^']|'')*'|[^)'])*\)", "VALUES (...)"),
            (r"'[^']{10,}'", "'...'"),
            (r"\b\d{10,}\b", "###"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Rule {
            pattern: Regex::new(pattern).expect("static regex"),
            replacement,
        })
        .collect()
    })
}

fn quoted_fragment() -> &'static Regex {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    QUOTED.get_or_init(|| {
        Regex::new(&format!(
            r#"(?i)(\b(?:{IDENTIFIER_KEYWORDS})\s+)?"[^"]*""#
        ))
        .expect("static regex")
    })
}

/// Redact double-quoted values, keeping quoted object names
fn redact_quoted(message: &str) -> String {
    quoted_fragment()
        .replace_all(message, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                "\"...\"".to_string()
            }
        })
        .into_owned()
}

/// Strip value-bearing fragments from an error message
///
/// Applied, in order:
///
/// - everything after `DETAIL:` is dropped
/// - `Key (col)=(value)` keeps the column list only
/// - `VALUES (...)` lists are collapsed, quoted strings containing `)` included
/// - double-quoted fragments become `"..."` unless they name an object
/// - single-quoted literals of 10+ characters become `'...'`
/// - runs of 10+ digits become `###`
///
/// # Examples
///
/// ```
/// use dbmask::core::sanitizer::sanitize_error;
///
/// let msg = "insert failed: INSERT INTO t VALUES ('Rajesh', 9876543210)";
/// assert_eq!(sanitize_error(msg), "insert failed: INSERT INTO t VALUES (...)");
///
/// let msg = r#"invalid input value for enum gender_t: "Priya""#;
/// assert_eq!(sanitize_error(msg), r#"invalid input value for enum gender_t: "...""#);
/// ```
pub fn sanitize_error(message: &str) -> String {
    let (structural, literals) = rules().split_at(3);
    let apply = |acc: String, rule: &Rule| {
        rule.pattern
            .replace_all(&acc, rule.replacement)
            .into_owned()
    };

    let sanitized = structural.iter().fold(message.to_string(), apply);
    let sanitized = redact_quoted(&sanitized);
    literals.iter().fold(sanitized, apply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(
        "syntax error near VALUES (1, 'Priya')",
        "syntax error near VALUES (...)" ;
        "values list"
    )]
    #[test_case(
        "bad literal 'rajesh@example.com'",
        "bad literal '...'" ;
        "long quoted literal"
    )]
    #[test_case("value 9876543210 too long", "value ### too long" ; "long number")]
    #[test_case("short 'abc' and 12345", "short 'abc' and 12345" ; "short values kept")]
    #[test_case(
        "invalid input value for enum gender_t: \"Priya\" [22P02]",
        "invalid input value for enum gender_t: \"...\" [22P02]" ;
        "enum value"
    )]
    #[test_case(
        "value \"98765\" is out of range for type smallint [22003]",
        "value \"...\" is out of range for type smallint [22003]" ;
        "out of range value"
    )]
    #[test_case(
        "syntax error in VALUES ('a)b', 'Priya')",
        "syntax error in VALUES (...)" ;
        "values list with paren inside literal"
    )]
    #[test_case(
        "relation \"users\" does not exist",
        "relation \"users\" does not exist" ;
        "relation name kept"
    )]
    fn test_sanitize(input: &str, expected: &str) {
        assert_eq!(sanitize_error(input), expected);
    }

    #[test]
    fn test_postgres_detail_is_redacted() {
        let msg = "duplicate key value violates unique constraint \"users_pkey\" [23505] \
                   DETAIL: Key (email)=(a@b.c) already exists.";
        let sanitized = sanitize_error(msg);
        assert!(sanitized.contains("[23505]"));
        assert!(sanitized.ends_with("DETAIL: [redacted]"));
        assert!(!sanitized.contains("a@b.c"));
    }

    #[test]
    fn test_short_values_never_survive() {
        for message in [
            "invalid input value for enum gender_t: \"Priya\" [22P02]",
            "value \"98765\" is out of range for type smallint [22003]",
            "syntax error in VALUES ('a)b', 'Priya')",
            "new row for relation \"users\" violates check constraint \"age_check\" value \"Priya\"",
        ] {
            let sanitized = sanitize_error(message);
            assert!(!sanitized.contains("Priya"), "{sanitized}");
            assert!(!sanitized.contains("98765"), "{sanitized}");
        }
    }

    #[test]
    fn test_object_names_are_kept() {
        let sanitized = sanitize_error(
            "insert or update on table \"orders\" violates foreign key constraint \"orders_user_fk\"",
        );
        assert!(sanitized.contains("table \"orders\""));
        assert!(sanitized.contains("constraint \"orders_user_fk\""));
    }

    #[test]
    fn test_key_and_type_echoes() {
        assert_eq!(
            sanitize_error("conflict on Key (phone)=(98765)"),
            "conflict on Key (phone)=(...)"
        );
        assert_eq!(
            sanitize_error("invalid input syntax for type integer: \"Rajesh\""),
            "invalid input syntax for type integer: \"...\""
        );
    }
}
