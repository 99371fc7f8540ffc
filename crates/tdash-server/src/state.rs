use std::sync::Arc;
use std::time::Duration;

use tdash_core::config::QueryLimits;
use tdash_core::error::TdashError;
use tdash_query::SchemaCatalog;
use tdash_store::{QueryInterrupt, Store};

use crate::error::ApiError;

/// Shared, read-only state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub catalog: Arc<SchemaCatalog>,
    pub limits: Arc<QueryLimits>,
}

impl AppState {
    pub fn new(store: Store, catalog: SchemaCatalog, limits: QueryLimits) -> Self {
        Self {
            store: Arc::new(store),
            catalog: Arc::new(catalog),
            limits: Arc::new(limits),
        }
    }

    /// Run a store call on the blocking pool under the configured timeout.
    ///
    /// On timeout the running SQLite statement is interrupted, and any
    /// statement the closure would start afterwards fails immediately.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Store) -> Result<T, TdashError> + Send + 'static,
        T: Send + 'static,
    {
        let interrupt = QueryInterrupt::new();
        let store = self.store.interruptible(&interrupt);
        let timeout_ms = self.limits.timeout_ms;
        let task = tokio::task::spawn_blocking(move || f(&store));

        match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
            Ok(Ok(result)) => result.map_err(ApiError::from),
            Ok(Err(join)) => Err(ApiError::Internal(join.to_string())),
            Err(_) => {
                interrupt.interrupt();
                Err(ApiError::Timeout(timeout_ms))
            }
        }
    }
}
