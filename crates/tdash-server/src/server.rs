use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use tdash_core::error::TdashError;

use crate::handlers;
use crate::state::AppState;

/// Build the router with its middleware stack.
pub fn build_app(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/query/execute", post(handlers::execute_query))
        .route("/query/facets", post(handlers::query_facets))
        .route("/query/schema", get(handlers::query_schema))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
}

/// Serve until Ctrl+C.
///
/// # Errors
///
/// Returns [`TdashError::Io`] if the listener cannot bind or the server
/// loop fails.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<(), TdashError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "tdash listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
