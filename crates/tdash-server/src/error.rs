//! HTTP error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use tdash_core::error::{QueryError, TdashError};

/// Errors surfaced by the query routes. Every variant renders as
/// `{ "error": "<message>" }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request failed validation; the message is the client contract.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Body was not valid JSON for the expected shape.
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    /// The store rejected compiled SQL.
    #[error("{0}")]
    Store(String),

    #[error("Query timed out after {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TdashError> for ApiError {
    fn from(e: TdashError) -> Self {
        match e {
            TdashError::Query(q) => Self::Query(q),
            TdashError::Store(msg) => Self::Store(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Timeout(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Query(q) => warn!(kind = ?q.kind(), error = %q, "query rejected"),
            Self::BadRequest(msg) => warn!(error = %msg, "malformed request body"),
            other => error!(error = %other, "query failed"),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        let err = ApiError::from(QueryError::UnknownColumn("x".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Unknown column: x");

        let err = ApiError::from(TdashError::Query(QueryError::NoColumns));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_and_timeout_are_server_errors() {
        let err = ApiError::from(TdashError::Store("no such table: x".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "no such table: x");
        assert_eq!(
            ApiError::Timeout(30).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
