//! QueryConfig → parameterized SQL compiler.
//!
//! Compilation is a single pass that fills a [`QueryPlan`] (resolved select
//! list, joins, filter fragment, group and order lists) and then renders
//! it. Every identifier is validated or quoted on the way in; every filter
//! value is bound as a positional `?` parameter.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use tdash_core::config::QueryLimits;
use tdash_core::error::QueryError;
use tdash_core::model::{ColumnRef, ExpressionColumn, JoinSpec, OrderBy, QueryConfig};

use crate::catalog::SchemaCatalog;
use crate::expression::validate_expression;
use crate::filter::{CompiledFilter, FilterCompiler};
use crate::sanitize::{
    quote_identifier, sanitize_alias, validate_aggregate_function, AggregateFunction,
};
use crate::scope::Scope;

/// A compiled SQL query with bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    /// The SQL query string with `?` placeholders.
    pub sql: String,
    /// Row-count query over the same FROM/WHERE/GROUP BY shape. Present
    /// only when an offset was requested; shares `params` with `sql`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_sql: Option<String>,
    /// Bound parameter values in order.
    pub params: Vec<SqlParam>,
    /// Effective (clamped) row limit.
    pub limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// A SQL parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

/// One entry of the SELECT list.
#[derive(Debug, Clone)]
struct SelectItem {
    /// Rendered entry, including any `AS` clause.
    sql: String,
    /// Bare SQL for the value, used when a GROUP BY or ORDER BY entry
    /// refers to a plain column by its alias.
    value_sql: String,
    /// Output alias, if one was given or generated.
    alias: Option<String>,
    /// Result column name as SQLite reports it.
    output: String,
    kind: SelectKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectKind {
    Column,
    Aggregate,
    Expression,
}

/// Intermediate representation collected before rendering.
#[derive(Debug, Default)]
struct QueryPlan {
    from: String,
    joins: Vec<String>,
    select: Vec<SelectItem>,
    filter: Option<CompiledFilter>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: i64,
    offset: Option<i64>,
}

impl QueryPlan {
    fn from_and_where(&self) -> String {
        let mut sql = format!(" FROM {}", self.from);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        sql
    }

    fn select_list(&self) -> String {
        self.select
            .iter()
            .map(|item| item.sql.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rows in a grouped or aggregated result are not raw rows, so those
    /// shapes are counted through a subquery.
    fn needs_subquery_count(&self) -> bool {
        !self.group_by.is_empty()
            || self
                .select
                .iter()
                .any(|s| s.kind != SelectKind::Column)
    }

    fn render(self) -> CompiledQuery {
        let body = self.from_and_where();

        let mut sql = format!("SELECT {}{body}", self.select_list());
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        sql.push_str(&format!(" LIMIT {}", self.limit));
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let count_sql = self.offset.map(|_| {
            if self.needs_subquery_count() {
                format!("SELECT COUNT(*) FROM (SELECT {}{body})", self.select_list())
            } else {
                format!("SELECT COUNT(*){body}")
            }
        });

        CompiledQuery {
            sql,
            count_sql,
            params: self.filter.map(|f| f.params).unwrap_or_default(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Compiles [`QueryConfig`]s against a schema catalog.
pub struct QueryCompiler<'a> {
    catalog: &'a SchemaCatalog,
    limits: &'a QueryLimits,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(catalog: &'a SchemaCatalog, limits: &'a QueryLimits) -> Self {
        Self { catalog, limits }
    }

    /// Compile a query request into SQL.
    ///
    /// # Errors
    ///
    /// Returns the first [`QueryError`] encountered; nothing is rendered
    /// for a request that fails any check.
    pub fn compile(&self, config: &QueryConfig) -> Result<CompiledQuery, QueryError> {
        let source = self.catalog.validate_source(&config.source_table)?;
        if config.columns.is_empty() && config.expression_columns.is_empty() {
            return Err(QueryError::NoColumns);
        }

        let mut plan = QueryPlan {
            from: quote_identifier(source.name()),
            ..QueryPlan::default()
        };

        let mut scope = Scope::new(self.catalog, source);
        plan.joins = build_joins(self.catalog, &mut scope, &config.joins)?;

        // Rows are keyed by result column name, so names must be unique.
        let mut outputs = HashSet::new();
        for column in &config.columns {
            let item = self.select_column(&scope, column)?;
            plan.select.push(claim_output(&mut outputs, item, &column.column)?);
        }
        for expression in &config.expression_columns {
            let item = self.select_expression(&scope, expression)?;
            plan.select.push(claim_output(&mut outputs, item, &expression.alias)?);
        }

        plan.filter =
            FilterCompiler::new(&scope, self.limits.max_filter_depth).compile(&config.filters)?;

        for entry in &config.group_by {
            plan.group_by.push(group_entry(&scope, config, &plan.select, entry)?);
        }
        for entry in &config.order_by {
            plan.order_by.push(order_entry(&scope, &plan.select, entry)?);
        }

        plan.limit = clamp_limit(config.limit, self.limits);
        plan.offset = config.offset.map(|o| o.max(0));

        let compiled = plan.render();
        debug!(
            sql = %compiled.sql,
            params = compiled.params.len(),
            "compiled query"
        );
        Ok(compiled)
    }

    fn select_column(&self, scope: &Scope<'_>, column: &ColumnRef) -> Result<SelectItem, QueryError> {
        let aggregate = column
            .aggregate_function
            .as_deref()
            .map(validate_aggregate_function)
            .transpose()?;

        // Plain columns may omit the alias; browsers send "" for that.
        let explicit_alias = match column.alias.as_deref().map(str::trim) {
            Some(alias) if !alias.is_empty() => Some(sanitize_alias(alias)?),
            _ => None,
        };

        if column.column == "*" {
            return match aggregate {
                Some(AggregateFunction::Count) => {
                    let alias = explicit_alias.unwrap_or_else(|| "count_all".to_string());
                    Ok(SelectItem {
                        sql: format!("COUNT(*) AS {}", quote_identifier(&alias)),
                        value_sql: "COUNT(*)".to_string(),
                        output: alias.clone(),
                        alias: Some(alias),
                        kind: SelectKind::Aggregate,
                    })
                }
                _ => Err(QueryError::InvalidColumnName(column.column.clone())),
            };
        }

        let resolved = scope.resolve_column(&column.column)?;

        match aggregate {
            Some(func) => {
                let alias = match explicit_alias {
                    Some(alias) => alias,
                    None => sanitize_alias(&format!("{}_{}", func.alias_prefix(), column.column))?,
                };
                let value_sql = format!("{}({})", func.as_sql(), resolved.sql);
                Ok(SelectItem {
                    sql: format!("{value_sql} AS {}", quote_identifier(&alias)),
                    value_sql,
                    output: alias.clone(),
                    alias: Some(alias),
                    kind: SelectKind::Aggregate,
                })
            }
            None => {
                let sql = match &explicit_alias {
                    Some(alias) if *alias != resolved.name => {
                        format!("{} AS {}", resolved.sql, quote_identifier(alias))
                    }
                    _ => resolved.sql.clone(),
                };
                Ok(SelectItem {
                    sql,
                    value_sql: resolved.sql,
                    output: explicit_alias.clone().unwrap_or(resolved.name),
                    alias: explicit_alias,
                    kind: SelectKind::Column,
                })
            }
        }
    }

    fn select_expression(
        &self,
        scope: &Scope<'_>,
        expression: &ExpressionColumn,
    ) -> Result<SelectItem, QueryError> {
        let alias = sanitize_alias(&expression.alias).map_err(|_| QueryError::EmptyExpressionAlias)?;
        let validated =
            validate_expression(&expression.expression, scope, self.limits.max_expression_length)?;
        let value_sql = format!("({})", validated.as_str());
        Ok(SelectItem {
            sql: format!("{value_sql} AS {}", quote_identifier(&alias)),
            value_sql,
            output: alias.clone(),
            alias: Some(alias),
            kind: SelectKind::Expression,
        })
    }
}

/// Reserve `item`'s result column name.
///
/// An unaliased plain column that collides with an earlier one (`c.id`
/// after `id`) is renamed after its reference (`c_id`); any other
/// collision is an error.
fn claim_output(
    outputs: &mut HashSet<String>,
    mut item: SelectItem,
    reference: &str,
) -> Result<SelectItem, QueryError> {
    if outputs.insert(item.output.clone()) {
        return Ok(item);
    }
    if item.kind == SelectKind::Column && item.alias.is_none() {
        let alias = sanitize_alias(reference)?;
        if outputs.insert(alias.clone()) {
            item.sql = format!("{} AS {}", item.value_sql, quote_identifier(&alias));
            item.output = alias.clone();
            item.alias = Some(alias);
            return Ok(item);
        }
    }
    Err(QueryError::DuplicateOutputColumn(item.output))
}

pub(crate) fn build_joins(
    catalog: &SchemaCatalog,
    scope: &mut Scope<'_>,
    joins: &[JoinSpec],
) -> Result<Vec<String>, QueryError> {
    let mut clauses = Vec::with_capacity(joins.len());
    for join in joins {
        let keyword = match join.join_type.to_ascii_uppercase().as_str() {
            "LEFT" => "LEFT JOIN",
            "INNER" => "INNER JOIN",
            _ => return Err(QueryError::InvalidJoinType(join.join_type.clone())),
        };
        let table = catalog.validate_source(&join.table)?;
        let reference = match join.alias.as_deref().map(str::trim) {
            Some(alias) if !alias.is_empty() => sanitize_alias(alias)?,
            _ => table.name().to_string(),
        };

        let target = if reference == table.name() {
            quote_identifier(table.name())
        } else {
            format!(
                "{} AS {}",
                quote_identifier(table.name()),
                quote_identifier(&reference)
            )
        };

        scope.add_join(&reference, table)?;
        let left = scope.resolve_column(&join.on.left)?;
        let right = scope.resolve_in(&reference, &join.on.right)?;
        clauses.push(format!("{keyword} {target} ON {} = {}", left.sql, right.sql));
    }
    Ok(clauses)
}

fn group_entry(
    scope: &Scope<'_>,
    config: &QueryConfig,
    select: &[SelectItem],
    entry: &str,
) -> Result<String, QueryError> {
    // An expression alias is replaced by the expression itself.
    let by_expression_alias = config
        .expression_columns
        .iter()
        .zip(select.iter().filter(|s| s.kind == SelectKind::Expression))
        .find(|(expr, item)| expr.alias.trim() == entry || item.alias.as_deref() == Some(entry));
    if let Some((_, item)) = by_expression_alias {
        return Ok(item.value_sql.clone());
    }

    if let Some(item) = select
        .iter()
        .find(|s| s.kind == SelectKind::Column && s.alias.as_deref() == Some(entry))
    {
        return Ok(item.value_sql.clone());
    }

    Ok(scope.resolve_column(entry)?.sql)
}

fn order_entry(
    scope: &Scope<'_>,
    select: &[SelectItem],
    entry: &OrderBy,
) -> Result<String, QueryError> {
    let direction = match entry.direction.to_ascii_uppercase().as_str() {
        "ASC" => "ASC",
        "DESC" => "DESC",
        _ => return Err(QueryError::InvalidSortDirection(entry.direction.clone())),
    };

    let aliased = select
        .iter()
        .find(|s| s.alias.as_deref() == Some(entry.column.as_str()));
    let target = match aliased {
        Some(item) if item.kind == SelectKind::Column => item.value_sql.clone(),
        Some(item) => quote_identifier(item.alias.as_deref().unwrap_or_default()),
        None => scope.resolve_column(&entry.column)?.sql,
    };
    Ok(format!("{target} {direction}"))
}

/// Effective limit: the requested (or default) value clamped to
/// `[1, max_rows]`. Out-of-range requests are clamped, never rejected.
#[must_use]
pub fn clamp_limit(requested: Option<i64>, limits: &QueryLimits) -> i64 {
    let max = limits.max_rows.max(1);
    requested.unwrap_or(limits.default_limit).clamp(1, max)
}
