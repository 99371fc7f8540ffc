//! Route handlers for the dynamic query API.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use tdash_core::model::{FacetQueryConfig, QueryConfig};
use tdash_query::{
    execute, execute_facets, FacetCompiler, Facets, QueryCompiler, SourceSchema,
};
use tdash_store::Row;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of a successful `/query/execute` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub data: Vec<Row>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    /// Generated SQL with `?` placeholders; never carries filter values.
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<Facets>,
}

#[derive(Debug, Serialize)]
pub struct FacetsResponse {
    pub facets: Facets,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// `POST /query/execute`
///
/// The data query and any requested facets run concurrently. A facet
/// failure is logged and drops `facets` from the response; it never fails
/// the data query.
pub async fn execute_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryConfig>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let config = body(payload)?;
    let compiled = QueryCompiler::new(&state.catalog, &state.limits).compile(&config)?;

    let facet_queries = if config.facet_columns.is_empty() {
        None
    } else {
        match FacetCompiler::new(&state.catalog, &state.limits).compile_for_query(&config) {
            Ok(queries) => Some(queries),
            Err(e) => {
                warn!(error = %e, "facet compilation failed; omitting facets");
                None
            }
        }
    };

    let data = {
        let compiled = compiled.clone();
        state.run_blocking(move |store| execute(store, &compiled))
    };
    let facets = async {
        match facet_queries {
            Some(queries) => state
                .run_blocking(move |store| Ok(execute_facets(store, &queries)))
                .await
                .map(Some),
            None => Ok(None),
        }
    };

    let (data, facets) = tokio::join!(data, facets);
    let result = data?;
    let facets = facets.unwrap_or_else(|e| {
        warn!(error = %e, "facet execution failed; omitting facets");
        None
    });

    Ok(Json(ExecuteResponse {
        data: result.data,
        row_count: result.row_count,
        total_count: result.total_count,
        sql: compiled.sql,
        facets,
    }))
}

/// `POST /query/facets`
pub async fn query_facets(
    State(state): State<AppState>,
    payload: Result<Json<FacetQueryConfig>, JsonRejection>,
) -> Result<Json<FacetsResponse>, ApiError> {
    let config = body(payload)?;
    let queries = FacetCompiler::new(&state.catalog, &state.limits).compile(&config)?;
    let facets = state
        .run_blocking(move |store| Ok(execute_facets(store, &queries)))
        .await?;
    Ok(Json(FacetsResponse { facets }))
}

/// `GET /query/schema`: allow-listed sources only.
pub async fn query_schema(State(state): State<AppState>) -> Json<Vec<SourceSchema>> {
    Json(state.catalog.schema().to_vec())
}

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
