//! # tdash-query
//!
//! Query engine for tdash. Compiles JSON query descriptions from untrusted
//! clients into parameterized SQL over an allow-listed schema.
//!
//! Includes:
//! - Schema catalog and identifier sanitizer
//! - Expression validator for computed columns
//! - Filter, query and facet compilers
//! - Executor and result formatter (JSON, Table, Markdown)

pub mod catalog;
pub mod compiler;
pub mod executor;
pub mod expression;
pub mod facets;
pub mod filter;
pub mod formatter;
pub mod sanitize;
pub mod scope;

pub use catalog::{SchemaCatalog, SourceDescriptor, SourceSchema, DEFAULT_ALLOWED_SOURCES};
pub use compiler::{clamp_limit, CompiledQuery, QueryCompiler, SqlParam};
pub use executor::{execute, execute_facets, Facets};
pub use facets::{FacetCompiler, FacetQuery, FacetValue};
pub use formatter::{format_results, OutputFormat, QueryResult};
