//! SQLite-backed [`Database`].

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, ffi};
use tracing::trace;

use ruleline_foundation::{Error, ErrorKind, Result, Value};

use crate::database::{Database, Row};
use crate::dialect::Dialect;

/// A SQLite connection.
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    /// Returns a database error if the file cannot be opened.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(map_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_error)?;
        Ok(Self { conn })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    /// Returns a database error if SQLite cannot be initialised.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_error)?;
        Ok(Self { conn })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Returns the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Runs several `;`-separated statements.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        trace!(sql, "db.execute_batch");
        self.conn.execute_batch(sql).map_err(map_error)
    }
}

impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        trace!(sql, "db.query");
        let mut stmt = self.conn.prepare(sql).map_err(map_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([]).map_err(map_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(from_sql(row.get_ref(i).map_err(map_error)?));
            }
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        trace!(sql, "db.execute");
        let affected = self.conn.execute(sql, []).map_err(map_error)?;
        Ok(affected as u64)
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Nil,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Maps a rusqlite error, singling out uniqueness violations.
fn map_error(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let unique = failure.code == ErrorCode::ConstraintViolation
            && matches!(
                failure.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            );
        if unique {
            let detail = message.clone().unwrap_or_else(|| err.to_string());
            return Error::new(ErrorKind::ConcurrencyConflict(detail));
        }
    }
    Error::database(err.to_string())
}
