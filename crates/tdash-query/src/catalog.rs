//! Schema catalog: the allow-list of queryable sources and their columns.
//!
//! The catalog is built once (from live introspection intersected with the
//! allow-list, or directly from a fixed description in tests) and is
//! immutable afterwards. It is passed to the compilers explicitly.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use tdash_core::error::{QueryError, TdashError};
use tdash_store::{ColumnInfo, Store};

/// Tables and views the dashboard may query.
///
/// Anything not named here is invisible to the dynamic query path, even if
/// it exists in the database.
pub const DEFAULT_ALLOWED_SOURCES: &[&str] = &[
    "Referenda",
    "Treasury",
    "Child Bounties",
    "Fellowship",
    "Fellowship Salary Cycles",
    "Fellowship Salary Claimants",
    "Fellowship Subtreasury",
    "Bounties",
    "Categories",
    "Subtreasury",
    "Treasury Netflows",
    "Cross Chain Transfers",
    "outstanding_claims",
    "expired_claims",
    "all_spending",
];

/// A source table or view that has passed allow-list validation.
///
/// Only [`SchemaCatalog::validate_source`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor(String);

impl SourceDescriptor {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One allow-listed source with its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl SourceSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

/// Immutable allow-list of sources and their columns.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    sources: Vec<SourceSchema>,
}

impl SchemaCatalog {
    /// Build a catalog from an explicit description.
    ///
    /// The given sources *are* the allow-list.
    #[must_use]
    pub fn from_sources(sources: Vec<SourceSchema>) -> Self {
        let mut deduped: Vec<SourceSchema> = Vec::with_capacity(sources.len());
        for source in sources {
            if !deduped.iter().any(|s| s.name == source.name) {
                deduped.push(source);
            }
        }
        Self { sources: deduped }
    }

    /// Introspect the live database and keep only allow-listed relations.
    ///
    /// Allow-listed names missing from the database are skipped with a
    /// warning. Relations present in the database but not allow-listed are
    /// never exposed.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if introspection fails.
    pub fn introspect<S: AsRef<str>>(store: &Store, allowed: &[S]) -> Result<Self, TdashError> {
        let relations = store.list_relations()?;
        let mut sources = Vec::new();

        for name in allowed {
            let name = name.as_ref();
            if !relations.iter().any(|r| r.name == name) {
                warn!(source = name, "allow-listed source not found in database");
                continue;
            }
            let columns = store.table_columns(name)?;
            sources.push(SourceSchema::new(name, columns));
        }

        let catalog = Self::from_sources(sources);
        info!(
            sources = catalog.sources.len(),
            "schema catalog loaded"
        );
        Ok(catalog)
    }

    /// Every allow-listed source, in allow-list order.
    #[must_use]
    pub fn list_allowed_sources(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .map(|s| SourceDescriptor(s.name.clone()))
            .collect()
    }

    /// Full schema for the `/query/schema` endpoint.
    #[must_use]
    pub fn schema(&self) -> &[SourceSchema] {
        &self.sources
    }

    /// Validate a source name by exact, case-sensitive membership.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidSourceTable`] for anything not in the
    /// allow-list.
    pub fn validate_source(&self, name: &str) -> Result<SourceDescriptor, QueryError> {
        if self.sources.iter().any(|s| s.name == name) {
            Ok(SourceDescriptor(name.to_string()))
        } else {
            Err(QueryError::InvalidSourceTable(name.to_string()))
        }
    }

    /// Columns of a validated source.
    #[must_use]
    pub fn columns(&self, source: &SourceDescriptor) -> &[ColumnInfo] {
        self.sources
            .iter()
            .find(|s| s.name == source.0)
            .map(|s| s.columns.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a column of a source. SQLite column names are
    /// case-insensitive, so an exact match is preferred but not required.
    #[must_use]
    pub fn column(&self, source: &SourceDescriptor, name: &str) -> Option<&ColumnInfo> {
        let columns = self.columns(source);
        columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}
