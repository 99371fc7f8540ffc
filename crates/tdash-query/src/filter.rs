//! Filter tree → parameterized WHERE fragment.
//!
//! Values are always bound as positional `?` parameters; only validated
//! column references and fixed operator text reach the SQL string.

use tdash_core::error::QueryError;
use tdash_core::model::{FilterCondition, FilterGroup, FilterNode, FilterValue, Filters};

use crate::compiler::SqlParam;
use crate::sanitize::{is_null_check_str, validate_operator, Operator};
use crate::scope::{is_text_like, ResolvedColumn, Scope};

/// A compiled WHERE fragment (without the `WHERE` keyword).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Compiles filter trees against a table scope.
pub struct FilterCompiler<'s, 'a> {
    scope: &'s Scope<'a>,
    max_depth: usize,
}

impl<'s, 'a> FilterCompiler<'s, 'a> {
    pub fn new(scope: &'s Scope<'a>, max_depth: usize) -> Self {
        Self { scope, max_depth }
    }

    /// Compile top-level filters.
    ///
    /// Returns `None` when nothing survives elision, meaning "no WHERE".
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for invalid operators, columns, value
    /// shapes, or nesting deeper than the configured limit.
    pub fn compile(&self, filters: &Filters) -> Result<Option<CompiledFilter>, QueryError> {
        let mut params = Vec::new();
        let sql = match filters {
            Filters::List(nodes) => self.compile_nodes(nodes, "AND", 0, &mut params)?,
            Filters::Group(group) => self.compile_group(group, 0, &mut params)?,
        };
        Ok(sql.map(|sql| CompiledFilter { sql, params }))
    }

    fn compile_group(
        &self,
        group: &FilterGroup,
        depth: usize,
        params: &mut Vec<SqlParam>,
    ) -> Result<Option<String>, QueryError> {
        let joiner = match group.operator.to_ascii_uppercase().as_str() {
            "AND" => "AND",
            "OR" => "OR",
            _ => return Err(QueryError::InvalidOperator(group.operator.clone())),
        };
        self.compile_nodes(&group.conditions, joiner, depth, params)
    }

    fn compile_nodes(
        &self,
        nodes: &[FilterNode],
        joiner: &str,
        depth: usize,
        params: &mut Vec<SqlParam>,
    ) -> Result<Option<String>, QueryError> {
        if depth > self.max_depth {
            return Err(QueryError::FilterTooDeep {
                max: self.max_depth,
            });
        }

        let mut parts = Vec::new();
        for node in nodes {
            let part = match node {
                FilterNode::Condition(cond) => self.compile_condition(cond, params)?,
                FilterNode::Group(group) => self.compile_group(group, depth + 1, params)?,
            };
            parts.extend(part);
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ if depth > 0 => Some(format!("({})", parts.join(&format!(" {joiner} ")))),
            _ => Some(parts.join(&format!(" {joiner} "))),
        })
    }

    fn compile_condition(
        &self,
        cond: &FilterCondition,
        params: &mut Vec<SqlParam>,
    ) -> Result<Option<String>, QueryError> {
        // Half-filled conditions are dropped before any validation.
        let blank = cond.value.as_ref().map_or(true, FilterValue::is_blank);
        if (blank && !is_null_check_str(&cond.operator)) || cond.column.trim().is_empty() {
            return Ok(None);
        }

        let op = validate_operator(&cond.operator)?;
        let column = self.scope.resolve_column(&cond.column)?;
        let col = &column.sql;

        let sql = match op {
            Operator::IsNull | Operator::IsNotNull => format!("{col} {}", op.as_sql()),
            Operator::In | Operator::NotIn => {
                let values = match cond.value.as_ref() {
                    Some(FilterValue::List(items)) => items.as_slice(),
                    Some(single) => std::slice::from_ref(single),
                    None => &[],
                };
                let mut placeholders = Vec::with_capacity(values.len());
                // `x IN (NULL)` never matches; use IS NULL for that.
                for value in values.iter().filter(|v| **v != FilterValue::Null) {
                    params.push(bind_value(&cond.column, &column, value)?);
                    placeholders.push("?");
                }
                format!("{col} {} ({})", op.as_sql(), placeholders.join(", "))
            }
            Operator::Ne => {
                params.push(scalar_param(cond, &column)?);
                format!("({col} != ? OR {col} IS NULL)")
            }
            _ => {
                params.push(scalar_param(cond, &column)?);
                format!("{col} {} ?", op.as_sql())
            }
        };
        Ok(Some(sql))
    }
}

fn scalar_param(cond: &FilterCondition, column: &ResolvedColumn) -> Result<SqlParam, QueryError> {
    match cond.value.as_ref() {
        Some(FilterValue::List(_)) => Err(QueryError::InvalidFilterValue {
            column: cond.column.clone(),
            reason: format!("operator {} expects a single value", cond.operator),
        }),
        Some(value) => bind_value(&cond.column, column, value),
        None => Ok(SqlParam::Null),
    }
}

/// Convert a client value into a bound parameter.
///
/// Numbers compared against text-typed columns (or columns with no declared
/// type) are bound as strings: SQLite will not match the integer `2025`
/// against the stored text `"2025"`.
fn bind_value(
    raw_column: &str,
    column: &ResolvedColumn,
    value: &FilterValue,
) -> Result<SqlParam, QueryError> {
    let text_column = is_text_like(&column.decl_type);
    let param = match value {
        FilterValue::Null => SqlParam::Null,
        FilterValue::Text(s) => SqlParam::Text(s.clone()),
        FilterValue::Integer(i) if text_column => SqlParam::Text(i.to_string()),
        FilterValue::Integer(i) => SqlParam::Integer(*i),
        FilterValue::Float(f) if text_column => SqlParam::Text(f.to_string()),
        FilterValue::Float(f) => SqlParam::Float(*f),
        FilterValue::Bool(b) if text_column => SqlParam::Text(i64::from(*b).to_string()),
        FilterValue::Bool(b) => SqlParam::Integer(i64::from(*b)),
        FilterValue::List(_) => {
            return Err(QueryError::InvalidFilterValue {
                column: raw_column.to_string(),
                reason: "nested lists are not supported".to_string(),
            })
        }
    };
    Ok(param)
}
