//! Expression validator for computed columns.
//!
//! Expressions are the one place where client text reaches the SQL string
//! without parameterization, so they go through three layers:
//!
//! 1. A denylist over the raw text (statement separators, comments, DML/DDL
//!    and administrative keywords), matched on word boundaries.
//! 2. The sqlparser tokenizer, which rejects bind-parameter sigils and
//!    unusual quoting, then a full parse as a single SQLite expression.
//! 3. A walk over the parsed tree: every function call must name a known
//!    scalar or aggregate function, and every column reference must resolve
//!    in the query's table scope. References that need qualifying are
//!    rewritten.
//!
//! It accepts the scalar subset dashboards use: arithmetic, `CASE WHEN`,
//! `COALESCE`, `NULLIF`, `IIF`, `ROUND` and friends.

use std::ops::ControlFlow;

use sqlparser::ast::{visit_expressions_mut, Expr, Ident};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use tdash_core::error::QueryError;

use crate::scope::{ResolvedColumn, Scope};

/// Raw-text fragments that are never allowed.
const BLOCKED_PUNCTUATION: &[&str] = &[";", "--", "/*", "*/"];

/// Keywords that are never allowed, matched as whole words.
const BLOCKED_KEYWORDS: &[&str] = &[
    "UNION",
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "CREATE",
    "ALTER",
    "EXEC",
    "EXECUTE",
    "VACUUM",
    "REINDEX",
    "GRANT",
    "REVOKE",
    "TRUNCATE",
    "INTO",
    "WITH",
    "RECURSIVE",
    "LOAD_EXTENSION",
    "ZEROBLOB",
    "RANDOMBLOB",
];

/// Characters that introduce bind parameters in SQLite.
const BIND_SIGILS: &[char] = &['?', ':', '@', '$'];

/// Functions that may be called.
const KNOWN_FUNCTIONS: &[&str] = &[
    "ABS",
    "AVG",
    "CAST",
    "CEIL",
    "CEILING",
    "CHAR",
    "COALESCE",
    "COUNT",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "CURRENT_TIMESTAMP",
    "DATE",
    "DATETIME",
    "EXP",
    "FLOOR",
    "FORMAT",
    "GROUP_CONCAT",
    "HEX",
    "IFNULL",
    "IIF",
    "INSTR",
    "JULIANDAY",
    "LENGTH",
    "LN",
    "LOG",
    "LOWER",
    "LTRIM",
    "MAX",
    "MIN",
    "MOD",
    "NULLIF",
    "POW",
    "POWER",
    "PRINTF",
    "REPLACE",
    "ROUND",
    "RTRIM",
    "SIGN",
    "SQRT",
    "STRFTIME",
    "SUBSTR",
    "SUBSTRING",
    "SUM",
    "TIME",
    "TOTAL",
    "TRIM",
    "TYPEOF",
    "UNIXEPOCH",
    "UPPER",
];

/// An expression that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedExpression(String);

impl ValidatedExpression {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validate a computed-column expression against the tables in `scope`.
///
/// Returns the expression text to place in SQL. It is the trimmed input
/// unless a column reference had to be qualified (a bare name shared with a
/// joined table, or a joined table named by its table name instead of its
/// alias), in which case the parsed expression is re-rendered.
///
/// # Errors
///
/// - [`QueryError::EmptyExpression`] for blank input
/// - [`QueryError::ExpressionTooLong`] past `max_length` characters
/// - [`QueryError::BlockedPattern`] for denylisted text or bind sigils
/// - [`QueryError::MalformedExpression`] for input that is not exactly one
///   SQL expression
/// - [`QueryError::UnknownFunction`] / [`QueryError::UnknownColumn`] for
///   names that do not resolve
pub fn validate_expression(
    expr: &str,
    scope: &Scope<'_>,
    max_length: usize,
) -> Result<ValidatedExpression, QueryError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(QueryError::EmptyExpression);
    }

    let len = expr.chars().count();
    if len > max_length {
        return Err(QueryError::ExpressionTooLong {
            len,
            max: max_length,
        });
    }

    check_denylist(expr)?;

    let dialect = SQLiteDialect {};
    let tokens = Tokenizer::new(&dialect, trimmed)
        .tokenize()
        .map_err(|e| malformed(&e.to_string()))?;
    check_tokens(&tokens)?;

    let mut parser = Parser::new(&dialect).with_tokens(tokens);
    let mut ast = parser.parse_expr().map_err(|e| malformed(&e.to_string()))?;
    let trailing = parser.peek_token().token;
    if trailing != Token::EOF {
        return Err(malformed(&format!("unexpected {trailing} after expression")));
    }

    let mut rewritten = false;
    if let ControlFlow::Break(err) = visit_expressions_mut(&mut ast, |node| {
        match check_node(node, scope) {
            Ok(changed) => {
                rewritten |= changed;
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }) {
        return Err(err);
    }

    if rewritten {
        Ok(ValidatedExpression(ast.to_string()))
    } else {
        Ok(ValidatedExpression(trimmed.to_string()))
    }
}

fn check_denylist(expr: &str) -> Result<(), QueryError> {
    if let Some(p) = BLOCKED_PUNCTUATION.iter().find(|p| expr.contains(**p)) {
        return Err(QueryError::BlockedPattern((*p).to_string()));
    }

    for word in expr.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        let upper = word.to_ascii_uppercase();
        if BLOCKED_KEYWORDS.contains(&upper.as_str()) || upper.starts_with("SQLITE_") {
            return Err(QueryError::BlockedPattern(upper));
        }
    }
    Ok(())
}

/// Reject bind parameters and any quoting other than `'literal'` and
/// `"identifier"`.
fn check_tokens(tokens: &[Token]) -> Result<(), QueryError> {
    for token in tokens {
        match token {
            Token::SingleQuotedString(_) => {}
            Token::Word(word) if matches!(word.quote_style, Some('`' | '[')) => {
                return Err(malformed("unsupported identifier quoting"));
            }
            Token::LBracket | Token::RBracket => {
                return Err(malformed("unsupported identifier quoting"));
            }
            other => {
                let text = other.to_string();
                if let Some(sigil) = text.chars().find(|c| BIND_SIGILS.contains(c)) {
                    return Err(QueryError::BlockedPattern(format!("bind parameter {sigil}")));
                }
            }
        }
    }
    Ok(())
}

fn malformed(reason: &str) -> QueryError {
    QueryError::MalformedExpression(reason.to_string())
}

/// Check one node of the parsed tree. Returns whether it was rewritten.
fn check_node(node: &mut Expr, scope: &Scope<'_>) -> Result<bool, QueryError> {
    let (qualifier, column) = match &*node {
        Expr::Function(func) => {
            let name = func.name.to_string();
            let plain = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !plain || !KNOWN_FUNCTIONS.contains(&name.to_ascii_uppercase().as_str()) {
                return Err(QueryError::UnknownFunction(name));
            }
            return Ok(false);
        }
        Expr::Identifier(ident) => (None, ident.value.clone()),
        Expr::CompoundIdentifier(parts) => match parts.as_slice() {
            [qualifier, column] => (Some(qualifier.value.clone()), column.value.clone()),
            _ => return Err(QueryError::UnknownColumn(node.to_string())),
        },
        _ => return Ok(false),
    };
    requalify(node, scope, qualifier.as_deref(), &column)
}

/// Resolve a column reference and rewrite it when its qualifier must change.
fn requalify(
    node: &mut Expr,
    scope: &Scope<'_>,
    given: Option<&str>,
    column: &str,
) -> Result<bool, QueryError> {
    if column.contains('.') || given.is_some_and(|q| q.contains('.')) {
        return Err(QueryError::UnknownColumn(node.to_string()));
    }
    let raw = match given {
        Some(qualifier) => format!("{qualifier}.{column}"),
        None => column.to_string(),
    };
    let resolved = scope
        .resolve_column(&raw)
        .map_err(|_| QueryError::UnknownColumn(node.to_string()))?;

    let unchanged = match (given, resolved.qualifier.as_deref()) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    };
    if unchanged {
        return Ok(false);
    }
    *node = column_expr(&resolved);
    Ok(true)
}

fn column_expr(column: &ResolvedColumn) -> Expr {
    let name = Ident::with_quote('"', column.name.as_str());
    match &column.qualifier {
        Some(qualifier) => {
            Expr::CompoundIdentifier(vec![Ident::with_quote('"', qualifier.as_str()), name])
        }
        None => Expr::Identifier(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::treasury_catalog;
    use crate::catalog::{SchemaCatalog, SourceSchema};
    use tdash_store::ColumnInfo;

    /// `Referenda` joined to `Categories AS c`; both have an `id` column.
    fn joined_scope(catalog: &SchemaCatalog) -> Scope<'_> {
        let mut scope = Scope::new(catalog, catalog.validate_source("Referenda").unwrap());
        scope
            .add_join("c", catalog.validate_source("Categories").unwrap())
            .unwrap();
        scope
    }

    fn check(expr: &str) -> Result<ValidatedExpression, QueryError> {
        let catalog = treasury_catalog();
        validate_expression(expr, &joined_scope(&catalog), 500)
    }

    fn check_unjoined(expr: &str) -> Result<ValidatedExpression, QueryError> {
        let catalog = treasury_catalog();
        let scope = Scope::new(&catalog, catalog.validate_source("Referenda").unwrap());
        validate_expression(expr, &scope, 500)
    }

    #[test]
    fn accepts_dashboard_scalar_expressions() {
        for expr in [
            "UPPER(status)",
            "DOT_latest * 2",
            "ROUND(DOT_latest / 1000.0, 2)",
            "COALESCE(USD_latest, 0) + 1.5e3",
            "NULLIF(track, '')",
            "IIF(DOT_latest > 100, 'big', 'small')",
            "CASE WHEN status = 'Executed' THEN DOT_latest ELSE 0 END",
            "CAST(DOT_latest AS INTEGER)",
            "\"DOT_latest\" - 1",
            "c.category || ' / ' || track",
            "status IN ('Executed', 'Approved')",
            "track LIKE '%Treasur%' ESCAPE '!'",
            "COUNT(*)",
        ] {
            let result = check(expr);
            assert!(result.is_ok(), "{expr}: {result:?}");
        }
    }

    #[test]
    fn unambiguous_expressions_are_kept_verbatim() {
        assert_eq!(
            check("  ROUND(DOT_latest / 1000.0, 2)  ").unwrap().as_str(),
            "ROUND(DOT_latest / 1000.0, 2)"
        );
        assert_eq!(check("C.category").unwrap().as_str(), "C.category");
        assert_eq!(check_unjoined("UPPER(status)").unwrap().as_str(), "UPPER(status)");
    }

    #[test]
    fn shared_bare_names_are_qualified_with_the_source() {
        assert_eq!(check("id + 1").unwrap().as_str(), "\"Referenda\".\"id\" + 1");
        // Without a join the same name needs no qualifier.
        assert_eq!(check_unjoined("id + 1").unwrap().as_str(), "id + 1");
    }

    #[test]
    fn join_columns_resolve_to_the_join_alias() {
        assert_eq!(
            check("Categories.category").unwrap().as_str(),
            "\"c\".\"category\""
        );
        assert_eq!(
            check("UPPER(subcategory)").unwrap().as_str(),
            "UPPER(\"c\".\"subcategory\")"
        );
    }

    #[test]
    fn denylist_applies_inside_literals_too() {
        let err = check("status LIKE '%DROP%'").unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(check(""), Err(QueryError::EmptyExpression));
        assert_eq!(check("   \n\t"), Err(QueryError::EmptyExpression));
        assert!(QueryError::EmptyExpression.to_string().contains("empty"));
    }

    #[test]
    fn rejects_over_length_cap() {
        let expr = format!("status || '{}'", "x".repeat(500));
        let err = check(&expr).unwrap_err();
        assert!(err.to_string().contains("too long"));
        // Exactly at the cap is fine.
        let at_cap = format!("'{}'", "x".repeat(498));
        assert!(check(&at_cap).is_ok());
    }

    #[test]
    fn blocks_statement_and_comment_markers() {
        for expr in [
            "status; DROP TABLE Referenda",
            "status -- trailing",
            "status /* hidden */",
            "1 UNION SELECT 1",
            "(SELECT password FROM users)",
            "select 1",
            "sElEcT 1",
            "INSERT",
            "UPDATE",
            "DELETE",
            "DROP",
            "ATTACH 'x' AS y",
            "PRAGMA table_info",
            "load_extension('evil')",
            "zeroblob(1000000000)",
            "sqlite_version()",
        ] {
            let err = check(expr).unwrap_err();
            assert!(err.to_string().contains("blocked"), "{expr}: {err}");
        }
    }

    #[test]
    fn keyword_check_respects_word_boundaries() {
        let catalog = SchemaCatalog::from_sources(vec![SourceSchema::new(
            "Proposals",
            vec![
                ColumnInfo::new("last_updated", "TEXT"),
                ColumnInfo::new("selection", "TEXT"),
            ],
        )]);
        let scope = Scope::new(&catalog, catalog.validate_source("Proposals").unwrap());
        assert!(validate_expression("last_updated", &scope, 500).is_ok());
        assert!(validate_expression("selection", &scope, 500).is_ok());
    }

    #[test]
    fn blocks_bind_parameter_sigils() {
        for expr in ["status = ?", "status = ?1", "status = :name", "status = @p", "status = $1"] {
            let err = check(expr).unwrap_err();
            assert!(err.to_string().contains("blocked"), "{expr}: {err}");
        }
        // Inside a string literal they are just text.
        assert!(check("status = 'what?'").is_ok());
    }

    #[test]
    fn rejects_input_that_is_not_one_expression() {
        for expr in [
            "UPPER(status",
            "status)",
            "'open",
            "[status]",
            "`status`",
            "status .",
            "status status",
            "1 2",
            "status = ",
        ] {
            assert!(
                matches!(check(expr), Err(QueryError::MalformedExpression(_))),
                "{expr}: {:?}",
                check(expr)
            );
        }
    }

    #[test]
    fn rejects_unknown_columns() {
        for expr in ["UPPER(password)", "\"secret col\" + 1", "x.category", "a.b.c"] {
            let err = check(expr).unwrap_err();
            assert!(err.to_string().contains("Unknown column"), "{expr}: {err}");
        }
    }

    #[test]
    fn rejects_unknown_functions() {
        let err = check("readfile(status)").unwrap_err();
        assert_eq!(err, QueryError::UnknownFunction("readfile".into()));
        // A quoted column name is not a function.
        assert!(matches!(
            check("\"status\"(1)"),
            Err(QueryError::UnknownFunction(_))
        ));
        assert!(matches!(
            check("main.upper(status)"),
            Err(QueryError::UnknownFunction(_))
        ));
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        assert!(check("STATUS").is_ok());
        assert!(check("C.Category").is_ok());
    }
}
