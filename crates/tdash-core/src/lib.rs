//! # tdash-core
//!
//! Foundational types shared by every tdash crate:
//! - Request model for dynamic queries ([`QueryConfig`], [`FilterNode`], [`JoinSpec`])
//! - Error hierarchy ([`TdashError`], [`QueryError`])
//! - Application configuration ([`AppConfig`], [`QueryLimits`])

pub mod config;
pub mod error;
pub mod model;

pub use config::{AppConfig, QueryLimits};
pub use error::{ErrorKind, QueryError, Result, TdashError};
pub use model::{
    ColumnRef, ExpressionColumn, FacetQueryConfig, FilterCondition, FilterGroup, FilterNode,
    FilterValue, Filters, JoinOn, JoinSpec, OrderBy, QueryConfig,
};
