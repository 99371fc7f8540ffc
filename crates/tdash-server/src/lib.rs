//! # tdash-server
//!
//! HTTP surface for the tdash query engine: `/query/execute`,
//! `/query/facets`, `/query/schema` and `/healthz`.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_app, serve};
pub use state::AppState;
