//! Error types for tdash.

use thiserror::Error;

/// Top-level result type for tdash operations.
pub type Result<T> = std::result::Result<T, TdashError>;

/// Top-level error type for tdash.
#[derive(Debug, Error)]
pub enum TdashError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Broad class of a query validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request shape is wrong: missing fields, unknown operators,
    /// tables outside the allow-list.
    Malformed,
    /// The request is well-shaped but references something that does not
    /// resolve, or an expression trips the safety checks.
    Semantic,
}

/// Errors raised while validating and compiling a dynamic query.
///
/// The display strings are part of the HTTP contract: clients match on
/// substrings such as "Invalid source table" or "blocked".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Invalid source table: {0}")]
    InvalidSourceTable(String),

    #[error("Invalid column name: {0}")]
    InvalidColumnName(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid aggregate function: {0}")]
    InvalidAggregateFunction(String),

    #[error("Invalid sort direction: {0}")]
    InvalidSortDirection(String),

    #[error("Invalid join type: {0}")]
    InvalidJoinType(String),

    #[error("Invalid join condition: {0}")]
    InvalidJoin(String),

    #[error("Invalid filter value for column '{column}': {reason}")]
    InvalidFilterValue { column: String, reason: String },

    #[error("Filter nesting exceeds maximum depth of {max}")]
    FilterTooDeep { max: usize },

    #[error("At least one column or expression column is required")]
    NoColumns,

    #[error("Duplicate output column: {0}")]
    DuplicateOutputColumn(String),

    #[error("Alias cannot be empty")]
    EmptyAlias,

    #[error("Expression column alias cannot be empty")]
    EmptyExpressionAlias,

    #[error("Expression cannot be empty")]
    EmptyExpression,

    #[error("Expression too long: {len} characters (max {max})")]
    ExpressionTooLong { len: usize, max: usize },

    #[error("Expression contains blocked pattern: {0}")]
    BlockedPattern(String),

    #[error("Malformed expression: {0}")]
    MalformedExpression(String),

    #[error("Unknown function in expression: {0}")]
    UnknownFunction(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

impl QueryError {
    /// Classify this failure as malformed input or a semantic violation.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSourceTable(_)
            | Self::InvalidOperator(_)
            | Self::InvalidAggregateFunction(_)
            | Self::InvalidSortDirection(_)
            | Self::InvalidJoinType(_)
            | Self::InvalidFilterValue { .. }
            | Self::FilterTooDeep { .. }
            | Self::NoColumns
            | Self::DuplicateOutputColumn(_)
            | Self::EmptyAlias
            | Self::EmptyExpressionAlias
            | Self::EmptyExpression => ErrorKind::Malformed,
            Self::InvalidColumnName(_)
            | Self::InvalidJoin(_)
            | Self::ExpressionTooLong { .. }
            | Self::BlockedPattern(_)
            | Self::MalformedExpression(_)
            | Self::UnknownFunction(_)
            | Self::UnknownColumn(_) => ErrorKind::Semantic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_contract_substrings() {
        let cases = [
            (QueryError::InvalidSourceTable("x".into()), "Invalid source table"),
            (QueryError::InvalidColumnName("x".into()), "Invalid column name"),
            (QueryError::InvalidOperator("~".into()), "Invalid operator"),
            (
                QueryError::InvalidAggregateFunction("MEDIAN".into()),
                "Invalid aggregate function",
            ),
            (QueryError::NoColumns, "At least one column"),
            (QueryError::EmptyExpressionAlias, "alias"),
            (QueryError::EmptyExpression, "empty"),
            (
                QueryError::ExpressionTooLong { len: 501, max: 500 },
                "too long",
            ),
            (QueryError::BlockedPattern("UNION".into()), "blocked"),
            (QueryError::UnknownColumn("nope".into()), "Unknown column"),
        ];
        for (err, needle) in cases {
            assert!(
                err.to_string().contains(needle),
                "{err} should contain {needle}"
            );
        }
    }

    #[test]
    fn query_errors_convert_into_top_level() {
        let err: TdashError = QueryError::NoColumns.into();
        assert!(matches!(err, TdashError::Query(QueryError::NoColumns)));
        assert!(err.to_string().starts_with("At least one column"));
    }

    #[test]
    fn kind_separates_shape_from_resolution() {
        assert_eq!(
            QueryError::InvalidSourceTable("x".into()).kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            QueryError::UnknownColumn("x".into()).kind(),
            ErrorKind::Semantic
        );
    }
}
