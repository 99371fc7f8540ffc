//! Identifier sanitizer.
//!
//! Every table name, column name, alias, operator and aggregate function
//! goes through here before it reaches a SQL string. Structural positions
//! (tables, columns, operators, aggregates) fail closed against strict
//! allow-lists. Aliases are cosmetic, so they are rewritten, not rejected.

use tdash_core::error::QueryError;

use crate::catalog::{SchemaCatalog, SourceDescriptor};

/// Filter operators accepted by the filter compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// `IS NULL` and `IS NOT NULL` take no value.
    pub fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }

    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

const OPERATORS: &[(&str, Operator)] = &[
    ("=", Operator::Eq),
    ("!=", Operator::Ne),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("LIKE", Operator::Like),
    ("IN", Operator::In),
    ("NOT IN", Operator::NotIn),
    ("IS NULL", Operator::IsNull),
    ("IS NOT NULL", Operator::IsNotNull),
];

/// Whether an operator string names one of the NULL checks.
pub(crate) fn is_null_check_str(op: &str) -> bool {
    op == "IS NULL" || op == "IS NOT NULL"
}

/// Aggregate functions allowed on selected columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    /// Lowercase prefix for auto-generated aliases (`sum_DOT_latest`).
    pub fn alias_prefix(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// Validate a source table against the catalog's allow-list.
///
/// # Errors
///
/// Returns [`QueryError::InvalidSourceTable`] for anything that is not an
/// exact allow-list member.
pub fn validate_source_table(
    catalog: &SchemaCatalog,
    name: &str,
) -> Result<SourceDescriptor, QueryError> {
    catalog.validate_source(name)
}

/// Validate a column name, optionally qualified with one dot.
///
/// Allowed shape: `^[A-Za-z_][A-Za-z0-9_ .]*$` with at most one dot, and
/// each side of the dot starting with a letter or underscore.
///
/// # Errors
///
/// Returns [`QueryError::InvalidColumnName`] otherwise.
pub fn sanitize_column_name(name: &str) -> Result<String, QueryError> {
    let invalid = || QueryError::InvalidColumnName(name.to_string());

    let starts_ok = |s: &str| {
        s.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    };

    if !starts_ok(name) {
        return Err(invalid());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '.')
    {
        return Err(invalid());
    }

    let mut parts = name.split('.');
    let first = parts.next().unwrap_or_default();
    if let Some(second) = parts.next() {
        if parts.next().is_some() || first.ends_with(' ') || !starts_ok(second) {
            return Err(invalid());
        }
    }

    Ok(name.to_string())
}

/// Rewrite an alias into a safe identifier.
///
/// Trims, replaces every character outside `[A-Za-z0-9_]` with `_`, and
/// prefixes `_` when the result would start with a digit.
///
/// # Errors
///
/// Returns [`QueryError::EmptyAlias`] when nothing is left after trimming.
pub fn sanitize_alias(name: &str) -> Result<String, QueryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(QueryError::EmptyAlias);
    }

    let mut out: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    Ok(out)
}

/// Validate a filter operator by exact match.
///
/// # Errors
///
/// Returns [`QueryError::InvalidOperator`] for anything else.
pub fn validate_operator(op: &str) -> Result<Operator, QueryError> {
    OPERATORS
        .iter()
        .find(|(s, _)| *s == op)
        .map(|(_, o)| *o)
        .ok_or_else(|| QueryError::InvalidOperator(op.to_string()))
}

/// Validate an aggregate function by exact match.
///
/// # Errors
///
/// Returns [`QueryError::InvalidAggregateFunction`] for anything else.
pub fn validate_aggregate_function(func: &str) -> Result<AggregateFunction, QueryError> {
    match func {
        "COUNT" => Ok(AggregateFunction::Count),
        "SUM" => Ok(AggregateFunction::Sum),
        "AVG" => Ok(AggregateFunction::Avg),
        "MIN" => Ok(AggregateFunction::Min),
        "MAX" => Ok(AggregateFunction::Max),
        other => Err(QueryError::InvalidAggregateFunction(other.to_string())),
    }
}

/// Quote a single identifier part for SQLite.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Split a sanitized column name into optional qualifier and column.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((qualifier, column)) => (Some(qualifier), column),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn column_names_accept_identifiers_spaces_and_one_dot() {
        for ok in ["status", "DOT_latest", "_private", "Child Bounties", "c.category", "r.DOT latest"] {
            assert_eq!(sanitize_column_name(ok).unwrap(), ok);
        }
    }

    #[test]
    fn column_names_reject_injection_shapes() {
        for bad in [
            "",
            "1abc",
            " status",
            "status; DROP TABLE x",
            "status'",
            "\"status\"",
            "COUNT(*)",
            "status -- comment",
            "a.b.c",
            "a.",
            ".a",
            "a .b",
            "a.1",
            "*",
        ] {
            let err = sanitize_column_name(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid column name"), "{bad:?}");
        }
    }

    #[test]
    fn alias_is_rewritten_not_rejected() {
        assert_eq!(sanitize_alias("total").unwrap(), "total");
        assert_eq!(sanitize_alias("  Total DOT  ").unwrap(), "Total_DOT");
        assert_eq!(sanitize_alias("x\"; DROP TABLE y;--").unwrap(), "x___DROP_TABLE_y___");
        assert_eq!(sanitize_alias("2025 spend").unwrap(), "_2025_spend");
        assert_eq!(sanitize_alias("größe").unwrap(), "gr__e");
    }

    #[test]
    fn empty_alias_is_rejected() {
        assert_eq!(sanitize_alias(""), Err(QueryError::EmptyAlias));
        assert_eq!(sanitize_alias("   "), Err(QueryError::EmptyAlias));
        assert!(QueryError::EmptyAlias.to_string().contains("Alias"));
    }

    #[test]
    fn operators_are_exact_matches() {
        assert_eq!(validate_operator("=").unwrap(), Operator::Eq);
        assert_eq!(validate_operator("NOT IN").unwrap(), Operator::NotIn);
        assert_eq!(validate_operator("IS NOT NULL").unwrap(), Operator::IsNotNull);
        for bad in ["==", "like", "OR 1=1", "; DROP", "", "IN "] {
            let err = validate_operator(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid operator"), "{bad:?}");
        }
    }

    #[test]
    fn aggregates_are_exact_matches() {
        assert_eq!(validate_aggregate_function("SUM").unwrap(), AggregateFunction::Sum);
        for bad in ["sum", "MEDIAN", "SUM(x); --", ""] {
            let err = validate_aggregate_function(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid aggregate function"));
        }
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_identifier("Child Bounties"), "\"Child Bounties\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn split_qualified_names() {
        assert_eq!(split_qualified("c.category"), (Some("c"), "category"));
        assert_eq!(split_qualified("status"), (None, "status"));
    }

    fn is_safe_alias(s: &str) -> bool {
        let mut chars = s.chars();
        let first = chars.next();
        first.is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    proptest! {
        #[test]
        fn alias_sanitization_is_total(s in "\\PC*") {
            match sanitize_alias(&s) {
                Ok(alias) => prop_assert!(is_safe_alias(&alias), "{alias:?}"),
                Err(e) => {
                    prop_assert!(s.trim().is_empty());
                    prop_assert_eq!(e, QueryError::EmptyAlias);
                }
            }
        }

        #[test]
        fn column_names_with_metacharacters_are_rejected(
            prefix in "[A-Za-z_][A-Za-z0-9_]{0,8}",
            meta in prop::sample::select(vec![";", "'", "\"", "(", ")", "--", "/*"]),
            suffix in "[A-Za-z0-9_ ]{0,8}",
        ) {
            let name = format!("{prefix}{meta}{suffix}");
            prop_assert!(sanitize_column_name(&name).is_err());
        }

        #[test]
        fn plain_identifiers_pass_unchanged(name in "[A-Za-z_][A-Za-z0-9_]{0,16}") {
            prop_assert_eq!(sanitize_column_name(&name).unwrap(), name);
        }
    }
}
