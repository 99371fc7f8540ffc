//! Table scope for a single query: the primary source plus joined tables.
//!
//! Resolves client column references into quoted SQL references and their
//! declared types, qualifying bare names that would otherwise be ambiguous.

use tdash_core::error::QueryError;
use tdash_store::ColumnInfo;

use crate::catalog::{SchemaCatalog, SourceDescriptor};
use crate::sanitize::{quote_identifier, sanitize_column_name, split_qualified};

/// A column reference ready to be placed in SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Quoted, possibly qualified reference (`"c"."category"`).
    pub sql: String,
    /// Table reference used in `sql`, if qualified.
    pub qualifier: Option<String>,
    /// Bare column name as declared in the schema.
    pub name: String,
    /// Declared type; empty when unknown (e.g. view expressions).
    pub decl_type: String,
}

#[derive(Debug, Clone)]
struct ScopedTable {
    /// Name used to qualify columns in SQL: the join alias, or the table name.
    reference: String,
    table: SourceDescriptor,
}

/// Tables visible to one query.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    catalog: &'a SchemaCatalog,
    source: SourceDescriptor,
    joins: Vec<ScopedTable>,
}

impl<'a> Scope<'a> {
    pub fn new(catalog: &'a SchemaCatalog, source: SourceDescriptor) -> Self {
        Self {
            catalog,
            source,
            joins: Vec::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Bring a joined table into scope under `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidJoin`] if `reference` is already taken.
    pub fn add_join(&mut self, reference: &str, table: SourceDescriptor) -> Result<(), QueryError> {
        if self.find_table(reference).is_some() {
            return Err(QueryError::InvalidJoin(format!(
                "duplicate table reference '{reference}'"
            )));
        }
        self.joins.push(ScopedTable {
            reference: reference.to_string(),
            table,
        });
        Ok(())
    }

    /// SQLite matches table names and aliases case-insensitively.
    fn find_table(&self, qualifier: &str) -> Option<(String, &SourceDescriptor)> {
        if qualifier.eq_ignore_ascii_case(self.source.name()) {
            return Some((self.source.name().to_string(), &self.source));
        }
        self.joins
            .iter()
            .find(|j| {
                j.reference.eq_ignore_ascii_case(qualifier)
                    || j.table.name().eq_ignore_ascii_case(qualifier)
            })
            .map(|j| (j.reference.clone(), &j.table))
    }

    fn lookup(&self, table: &SourceDescriptor, column: &str) -> Option<&ColumnInfo> {
        self.catalog.column(table, column)
    }

    /// Resolve a client column reference.
    ///
    /// Qualified references (`c.category`) resolve against the named table
    /// or join alias. Bare references prefer the primary source; when the
    /// same name also exists in a joined table, the result is qualified
    /// with the source name to avoid an ambiguous-column failure.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidColumnName`] for names that fail
    /// sanitization and [`QueryError::UnknownColumn`] for names that do not
    /// resolve to exactly one table.
    pub fn resolve_column(&self, raw: &str) -> Result<ResolvedColumn, QueryError> {
        let name = sanitize_column_name(raw)?;
        let unknown = || QueryError::UnknownColumn(raw.to_string());

        if let (Some(qualifier), column) = split_qualified(&name) {
            let (reference, table) = self.find_table(qualifier).ok_or_else(unknown)?;
            let info = self.lookup(table, column).ok_or_else(unknown)?;
            return Ok(ResolvedColumn {
                sql: format!(
                    "{}.{}",
                    quote_identifier(&reference),
                    quote_identifier(&info.name)
                ),
                qualifier: Some(reference),
                name: info.name.clone(),
                decl_type: info.decl_type.clone(),
            });
        }

        let in_joins: Vec<(&ScopedTable, &ColumnInfo)> = self
            .joins
            .iter()
            .filter_map(|j| self.lookup(&j.table, &name).map(|info| (j, info)))
            .collect();

        if let Some(info) = self.lookup(&self.source, &name) {
            let qualifier = (!in_joins.is_empty()).then(|| self.source.name().to_string());
            let sql = match &qualifier {
                None => quote_identifier(&info.name),
                Some(q) => format!("{}.{}", quote_identifier(q), quote_identifier(&info.name)),
            };
            return Ok(ResolvedColumn {
                sql,
                qualifier,
                name: info.name.clone(),
                decl_type: info.decl_type.clone(),
            });
        }

        match in_joins.as_slice() {
            [(join, info)] => Ok(ResolvedColumn {
                sql: format!(
                    "{}.{}",
                    quote_identifier(&join.reference),
                    quote_identifier(&info.name)
                ),
                qualifier: Some(join.reference.clone()),
                name: info.name.clone(),
                decl_type: info.decl_type.clone(),
            }),
            [] => Err(unknown()),
            _ => Err(QueryError::UnknownColumn(format!(
                "{raw} (ambiguous between joined tables)"
            ))),
        }
    }

    /// Resolve a column against one specific joined table.
    ///
    /// # Errors
    ///
    /// Same as [`Scope::resolve_column`].
    pub fn resolve_in(&self, reference: &str, raw: &str) -> Result<ResolvedColumn, QueryError> {
        let name = sanitize_column_name(raw)?;
        match split_qualified(&name) {
            (Some(_), _) => self.resolve_column(raw),
            (None, column) => self
                .resolve_column(&format!("{reference}.{column}"))
                .map_err(|_| QueryError::UnknownColumn(raw.to_string())),
        }
    }
}

/// Whether a declared column type compares as text in SQLite.
///
/// Columns without a declared type (common in views) count as text.
#[must_use]
pub fn is_text_like(decl_type: &str) -> bool {
    let upper = decl_type.to_ascii_uppercase();
    upper.is_empty() || upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::treasury_catalog;

    fn scope_with_join(catalog: &SchemaCatalog) -> Scope<'_> {
        let source = catalog.validate_source("Referenda").unwrap();
        let mut scope = Scope::new(catalog, source);
        let cats = catalog.validate_source("Categories").unwrap();
        scope.add_join("c", cats).unwrap();
        scope
    }

    #[test]
    fn bare_column_without_joins_is_unqualified() {
        let catalog = treasury_catalog();
        let source = catalog.validate_source("Referenda").unwrap();
        let scope = Scope::new(&catalog, source);
        let col = scope.resolve_column("status").unwrap();
        assert_eq!(col.sql, "\"status\"");
        assert_eq!(col.decl_type, "TEXT");
    }

    #[test]
    fn ambiguous_bare_column_is_qualified_with_source() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        let col = scope.resolve_column("id").unwrap();
        assert_eq!(col.sql, "\"Referenda\".\"id\"");
    }

    #[test]
    fn join_only_column_is_qualified_with_alias() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        let col = scope.resolve_column("subcategory").unwrap();
        assert_eq!(col.sql, "\"c\".\"subcategory\"");
    }

    #[test]
    fn explicit_qualifier_is_preserved() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        assert_eq!(
            scope.resolve_column("c.category").unwrap().sql,
            "\"c\".\"category\""
        );
        assert_eq!(
            scope.resolve_column("Referenda.status").unwrap().sql,
            "\"Referenda\".\"status\""
        );
        // The table name of an aliased join maps onto its alias.
        assert_eq!(
            scope.resolve_column("Categories.category").unwrap().sql,
            "\"c\".\"category\""
        );
    }

    #[test]
    fn unknown_references_fail() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        for raw in ["missing", "x.category", "c.missing"] {
            let err = scope.resolve_column(raw).unwrap_err();
            assert!(err.to_string().contains("Unknown column"), "{raw}");
        }
        let err = scope.resolve_column("status; --").unwrap_err();
        assert!(err.to_string().contains("Invalid column name"));
    }

    #[test]
    fn duplicate_join_reference_is_rejected() {
        let catalog = treasury_catalog();
        let mut scope = scope_with_join(&catalog);
        let cb = catalog.validate_source("Child Bounties").unwrap();
        assert!(scope.add_join("c", cb).is_err());
    }

    #[test]
    fn resolve_in_targets_the_join() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        assert_eq!(scope.resolve_in("c", "id").unwrap().sql, "\"c\".\"id\"");
    }

    #[test]
    fn qualifiers_match_case_insensitively() {
        let catalog = treasury_catalog();
        let scope = scope_with_join(&catalog);
        let col = scope.resolve_column("C.category").unwrap();
        assert_eq!(col.sql, "\"c\".\"category\"");
        assert_eq!(col.qualifier.as_deref(), Some("c"));
        let col = scope.resolve_column("referenda.status").unwrap();
        assert_eq!(col.qualifier.as_deref(), Some("Referenda"));
    }

    #[test]
    fn text_affinity() {
        assert!(is_text_like("TEXT"));
        assert!(is_text_like("varchar(32)"));
        assert!(is_text_like(""));
        assert!(!is_text_like("REAL"));
        assert!(!is_text_like("INTEGER"));
    }
}
