//! Facet compiler: distinct-value counts per column under a filter set.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tdash_core::config::QueryLimits;
use tdash_core::error::QueryError;
use tdash_core::model::{FacetQueryConfig, QueryConfig};

use crate::catalog::SchemaCatalog;
use crate::compiler::{build_joins, SqlParam};
use crate::filter::FilterCompiler;
use crate::sanitize::quote_identifier;
use crate::scope::Scope;

/// One compiled facet query. Result rows have the shape `{value, count}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetQuery {
    /// The column as requested by the client; used as the response key.
    pub column: String,
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// A distinct value and the number of rows carrying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: serde_json::Value,
    pub count: u64,
}

pub struct FacetCompiler<'a> {
    catalog: &'a SchemaCatalog,
    limits: &'a QueryLimits,
}

impl<'a> FacetCompiler<'a> {
    pub fn new(catalog: &'a SchemaCatalog, limits: &'a QueryLimits) -> Self {
        Self { catalog, limits }
    }

    /// Compile one query per requested column.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the source, a join, a facet column or
    /// the filter tree fails validation.
    pub fn compile(&self, config: &FacetQueryConfig) -> Result<Vec<FacetQuery>, QueryError> {
        let source = self.catalog.validate_source(&config.source_table)?;
        let from = quote_identifier(source.name());

        let mut scope = Scope::new(self.catalog, source);
        let joins = build_joins(self.catalog, &mut scope, &config.joins)?;
        let filter =
            FilterCompiler::new(&scope, self.limits.max_filter_depth).compile(&config.filters)?;

        let mut body = format!(" FROM {from}");
        for join in &joins {
            body.push(' ');
            body.push_str(join);
        }
        let params = match &filter {
            Some(f) => {
                body.push_str(" WHERE ");
                body.push_str(&f.sql);
                f.params.clone()
            }
            None => Vec::new(),
        };

        let mut queries = Vec::with_capacity(config.columns.len());
        for column in &config.columns {
            let resolved = scope.resolve_column(column)?;
            let sql = format!(
                "SELECT {col} AS \"value\", COUNT(*) AS \"count\"{body} GROUP BY {col} \
                 ORDER BY \"count\" DESC, \"value\" ASC LIMIT {limit}",
                col = resolved.sql,
                limit = self.limits.max_rows.max(1),
            );
            debug!(column = %column, sql = %sql, "compiled facet query");
            queries.push(FacetQuery {
                column: column.clone(),
                sql,
                params: params.clone(),
            });
        }
        Ok(queries)
    }

    /// Facet queries for the `facetColumns` of a data query, under the
    /// same source, joins and filters.
    ///
    /// # Errors
    ///
    /// Same as [`FacetCompiler::compile`].
    pub fn compile_for_query(&self, config: &QueryConfig) -> Result<Vec<FacetQuery>, QueryError> {
        self.compile(&FacetQueryConfig {
            source_table: config.source_table.clone(),
            columns: config.facet_columns.clone(),
            joins: config.joins.clone(),
            filters: config.filters.clone(),
        })
    }
}
