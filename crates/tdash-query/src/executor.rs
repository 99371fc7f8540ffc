//! Query executor: bridges compiled queries to SQLite execution.
//!
//! Takes a [`CompiledQuery`] and a [`Store`], executes the SQL (plus the
//! count query when one was compiled), and returns a [`QueryResult`].

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use tracing::warn;

use tdash_core::error::TdashError;
use tdash_store::Store;

use crate::compiler::{CompiledQuery, SqlParam};
use crate::facets::{FacetQuery, FacetValue};
use crate::formatter::QueryResult;

/// Facet results keyed by requested column.
pub type Facets = BTreeMap<String, Vec<FacetValue>>;

pub(crate) fn to_sql_values(params: &[SqlParam]) -> Vec<SqlValue> {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Text(s) => SqlValue::Text(s.clone()),
            SqlParam::Integer(i) => SqlValue::Integer(*i),
            SqlParam::Float(f) => SqlValue::Real(*f),
            SqlParam::Null => SqlValue::Null,
        })
        .collect()
}

/// Execute a compiled query.
///
/// # Errors
///
/// Returns [`TdashError::Store`] if SQLite rejects either statement.
pub fn execute(store: &Store, compiled: &CompiledQuery) -> Result<QueryResult, TdashError> {
    let params = to_sql_values(&compiled.params);
    let data = store.query_rows(&compiled.sql, &params)?;
    let total_count = match &compiled.count_sql {
        Some(count_sql) => Some(store.query_count(count_sql, &params)?),
        None => None,
    };

    Ok(QueryResult {
        row_count: data.len(),
        data,
        total_count,
    })
}

/// Execute facet queries. A column whose query fails is logged and
/// reported with no values; it never fails the other columns.
pub fn execute_facets(store: &Store, queries: &[FacetQuery]) -> Facets {
    let mut facets = Facets::new();
    for query in queries {
        let values = match run_facet(store, query) {
            Ok(values) => values,
            Err(e) => {
                warn!(column = %query.column, error = %e, "facet query failed");
                Vec::new()
            }
        };
        facets.insert(query.column.clone(), values);
    }
    facets
}

fn run_facet(store: &Store, query: &FacetQuery) -> Result<Vec<FacetValue>, TdashError> {
    let rows = store.query_rows(&query.sql, &to_sql_values(&query.params))?;
    Ok(rows
        .into_iter()
        .map(|mut row| FacetValue {
            value: row.remove("value").unwrap_or(serde_json::Value::Null),
            count: row
                .get("count")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0),
        })
        .collect())
}
