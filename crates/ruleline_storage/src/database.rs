//! Database access.
//!
//! The engine only ever sends SQL text. Hosts embed it by implementing
//! [`Database`] for their connection type; [`SqliteDatabase`] is the bundled
//! implementation.
//!
//! [`SqliteDatabase`]: crate::sqlite::SqliteDatabase

use ruleline_foundation::{Result, Value};

use crate::dialect::Dialect;

/// One result row.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Row {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Column values, parallel to `columns`.
    pub values: Vec<Value>,
}

impl Row {
    /// Creates a row.
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Returns the value of the named column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Returns the value of the named column, or nil.
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }
}

/// A connection the engine can run SQL on.
///
/// A uniqueness violation must be reported as
/// [`ErrorKind::ConcurrencyConflict`](ruleline_foundation::ErrorKind::ConcurrencyConflict)
/// so callers can recover from races; any other failure as
/// [`ErrorKind::Database`](ruleline_foundation::ErrorKind::Database).
pub trait Database {
    /// The dialect generated SQL must target.
    fn dialect(&self) -> Dialect;

    /// Runs a statement that returns rows.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    fn execute(&mut self, sql: &str) -> Result<u64>;
}

impl<D: Database + ?Sized> Database for &mut D {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        (**self).query(sql)
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        (**self).execute(sql)
    }
}
