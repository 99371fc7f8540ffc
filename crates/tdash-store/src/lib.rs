//! # tdash-store
//!
//! SQLite execution adapter for tdash.
//!
//! Owns no query logic: it introspects the live schema, runs SQL that the
//! query crate has already compiled and validated, and shapes result rows
//! into JSON objects.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, InterruptHandle, OpenFlags};
use serde::Serialize;
use tracing::debug;

use tdash_core::error::TdashError;

/// A result row keyed by output column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the reporting database.
///
/// File-backed stores open a fresh read-only connection per call so that
/// concurrent requests never queue behind one connection. In-memory stores
/// share a single connection, since each in-memory connection is its own
/// database.
#[derive(Clone)]
pub struct Store {
    source: Source,
    interrupt: Option<QueryInterrupt>,
}

#[derive(Clone)]
enum Source {
    File(PathBuf),
    Shared(Arc<Mutex<Connection>>),
}

#[derive(Default)]
struct InterruptState {
    handle: Option<InterruptHandle>,
    cancelled: bool,
}

/// Cancels the statements of a [`Store`] bound with [`Store::interruptible`].
///
/// Cancellation is sticky: once [`QueryInterrupt::interrupt`] has been
/// called, the running statement aborts and every later call through the
/// bound store fails without touching SQLite.
#[derive(Clone, Default)]
pub struct QueryInterrupt {
    state: Arc<Mutex<InterruptState>>,
}

impl QueryInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancelled = true;
            if let Some(handle) = &state.handle {
                handle.interrupt();
            }
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().map_or(true, |s| s.cancelled)
    }

    fn arm(&self, conn: &Connection) -> Result<(), TdashError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TdashError::Store("interrupt mutex poisoned".to_string()))?;
        if state.cancelled {
            return Err(TdashError::Store("query interrupted".to_string()));
        }
        state.handle = Some(conn.get_interrupt_handle());
        Ok(())
    }

    fn disarm(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.handle = None;
        }
    }
}

/// Whether a relation is a table or a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Table,
    View,
}

/// A table or view found in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
}

/// A column as reported by `pragma_table_info`.
///
/// `decl_type` is empty for view columns computed from expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub decl_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.into(),
        }
    }
}

fn store_err(e: rusqlite::Error) -> TdashError {
    TdashError::Store(e.to_string())
}

impl Store {
    /// Open an existing database file for read-only querying.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, TdashError> {
        let store = Self {
            source: Source::File(path.to_path_buf()),
            interrupt: None,
        };
        // Fail at startup rather than on the first request.
        store.with_conn(|_| Ok(()))?;
        Ok(store)
    }

    /// Create an empty in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if SQLite cannot allocate the database.
    pub fn in_memory() -> Result<Self, TdashError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self {
            source: Source::Shared(Arc::new(Mutex::new(conn))),
            interrupt: None,
        })
    }

    /// A handle on the same database whose statements `interrupt` can
    /// cancel from another thread.
    #[must_use]
    pub fn interruptible(&self, interrupt: &QueryInterrupt) -> Self {
        Self {
            source: self.source.clone(),
            interrupt: Some(interrupt.clone()),
        }
    }

    fn run<T>(
        &self,
        conn: &Connection,
        f: impl FnOnce(&Connection) -> Result<T, TdashError>,
    ) -> Result<T, TdashError> {
        let Some(interrupt) = &self.interrupt else {
            return f(conn);
        };
        interrupt.arm(conn)?;
        let result = f(conn);
        interrupt.disarm();
        result
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, TdashError>,
    ) -> Result<T, TdashError> {
        match &self.source {
            Source::File(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )
                .map_err(store_err)?;
                conn.busy_timeout(BUSY_TIMEOUT).map_err(store_err)?;
                self.run(&conn, f)
            }
            Source::Shared(conn) => {
                let guard = conn
                    .lock()
                    .map_err(|_| TdashError::Store("connection mutex poisoned".to_string()))?;
                self.run(&guard, f)
            }
        }
    }

    /// Run a batch of statements.
    ///
    /// Only for fixtures and administration. File-backed stores are opened
    /// read-only, so this fails on them.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if any statement fails.
    pub fn execute_batch(&self, sql: &str) -> Result<(), TdashError> {
        self.with_conn(|conn| conn.execute_batch(sql).map_err(store_err))
    }

    /// List user tables and views, excluding SQLite's internal ones.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if the catalog query fails.
    pub fn list_relations(&self) -> Result<Vec<Relation>, TdashError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, type FROM sqlite_master
                     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(store_err)?;

            let relations = stmt
                .query_map([], |row| {
                    let kind: String = row.get(1)?;
                    Ok(Relation {
                        name: row.get(0)?,
                        kind: if kind == "view" {
                            RelationKind::View
                        } else {
                            RelationKind::Table
                        },
                    })
                })
                .map_err(store_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(store_err)?;

            Ok(relations)
        })
    }

    /// Columns of a table or view, in declaration order.
    ///
    /// Returns an empty list for a relation that does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if the pragma query fails.
    pub fn table_columns(&self, relation: &str) -> Result<Vec<ColumnInfo>, TdashError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
                .map_err(store_err)?;

            let columns = stmt
                .query_map(params![relation], |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                })
                .map_err(store_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(store_err)?;

            Ok(columns)
        })
    }

    /// Execute a SELECT and return each row as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] with the driver's message if SQLite
    /// rejects the statement or a row cannot be read.
    pub fn query_rows(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, TdashError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(store_err)?;
            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

            let mut rows = stmt
                .query(rusqlite::params_from_iter(params.iter()))
                .map_err(store_err)?;

            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(store_err)? {
                let mut fields = Row::new();
                for (i, name) in names.iter().enumerate() {
                    let value = row.get_ref(i).map_err(store_err)?;
                    fields.insert(name.clone(), value_to_json(value));
                }
                out.push(fields);
            }
            debug!(rows = out.len(), "query returned");
            Ok(out)
        })
    }

    /// Execute a query whose first column of the first row is a count.
    ///
    /// # Errors
    ///
    /// Returns [`TdashError::Store`] if the query fails.
    pub fn query_count(&self, sql: &str, params: &[SqlValue]) -> Result<u64, TdashError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(sql, rusqlite::params_from_iter(params.iter()), |row| {
                    row.get(0)
                })
                .map_err(store_err)?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => {
            serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
        }
    }
}
