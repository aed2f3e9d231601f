//! SQL dialects.
//!
//! Generated SQL is plain text with literals inlined. Everything that
//! differs between engines (JSON construction and lookup, array
//! aggregation, casts, conflict handling, column types) goes through
//! [`Dialect`].

use std::fmt;
use std::str::FromStr;

use ruleline_foundation::{Error, ErrorKind, Value};
use ruleline_language::{JsonType, PathSegment};

/// A target SQL engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// SQLite 3.38 or later (JSON functions built in).
    #[default]
    Sqlite,
    /// PostgreSQL 12 or later.
    Postgres,
}

impl Dialect {
    /// Returns the dialect name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    /// Quotes an identifier.
    #[must_use]
    pub fn quote_ident(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes a string literal.
    #[must_use]
    pub fn quote_str(self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    /// Renders a value as an inline SQL literal.
    #[must_use]
    pub fn literal(self, value: &Value) -> String {
        match value {
            Value::Nil => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) if x.is_finite() => format!("{x:?}"),
            Value::Float(_) => "NULL".to_string(),
            Value::Text(s) => self.quote_str(s),
        }
    }

    /// Renders a JSON text literal for a JSON-typed column.
    #[must_use]
    pub fn json_literal(self, json: &str) -> String {
        match self {
            Self::Sqlite => self.quote_str(json),
            Self::Postgres => format!("{}::jsonb", self.quote_str(json)),
        }
    }

    /// Builds a JSON object from `(key, sql)` pairs.
    #[must_use]
    pub fn json_object(self, pairs: &[(String, String)]) -> String {
        let args = pairs
            .iter()
            .map(|(key, sql)| format!("{}, {sql}", self.quote_str(key)))
            .collect::<Vec<_>>()
            .join(", ");
        match self {
            Self::Sqlite => format!("json_object({args})"),
            Self::Postgres => format!("json_build_object({args})"),
        }
    }

    /// Aggregates `expr` into a JSON array.
    #[must_use]
    pub fn json_array_agg(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("json_group_array({expr})"),
            Self::Postgres => format!("json_agg({expr})"),
        }
    }

    /// The empty JSON array, used when an array aggregate sees no rows.
    #[must_use]
    pub const fn empty_json_array(self) -> &'static str {
        match self {
            Self::Sqlite => "'[]'",
            Self::Postgres => "'[]'::json",
        }
    }

    /// Marks `expr` as JSON so it nests as a value rather than a string.
    ///
    /// SQLite loses the JSON subtype when a value passes through a subquery.
    #[must_use]
    pub fn embed_json(self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("json({expr})"),
            Self::Postgres => expr.to_string(),
        }
    }

    /// Casts `expr` to a scalar type.
    #[must_use]
    pub fn cast(self, expr: &str, ty: JsonType) -> String {
        match (self, ty) {
            (_, JsonType::Json) => expr.to_string(),
            (Self::Sqlite, JsonType::Integer | JsonType::Boolean) => {
                format!("CAST({expr} AS INTEGER)")
            }
            (Self::Sqlite, JsonType::Float) => format!("CAST({expr} AS REAL)"),
            (Self::Sqlite, JsonType::Text) => format!("CAST({expr} AS TEXT)"),
            (Self::Postgres, JsonType::Integer) => format!("({expr})::bigint"),
            (Self::Postgres, JsonType::Float) => format!("({expr})::double precision"),
            (Self::Postgres, JsonType::Text) => format!("({expr})::text"),
            (Self::Postgres, JsonType::Boolean) => format!("({expr})::boolean"),
        }
    }

    /// Looks up `path` inside the JSON value `expr`, reading it as `ty`.
    #[must_use]
    pub fn json_lookup(self, expr: &str, path: &[PathSegment], ty: JsonType) -> String {
        if path.is_empty() {
            return self.cast(expr, ty);
        }
        match self {
            Self::Sqlite => {
                let mut json_path = String::from("$");
                for segment in path {
                    match segment {
                        PathSegment::Key(key) => {
                            json_path.push_str(".\"");
                            json_path.push_str(&key.replace('\\', "\\\\").replace('"', "\\\""));
                            json_path.push('"');
                        }
                        PathSegment::Index(index) if *index < 0 => {
                            json_path.push_str(&format!("[#{index}]"));
                        }
                        PathSegment::Index(index) => json_path.push_str(&format!("[{index}]")),
                    }
                }
                let extract = format!("json_extract({expr}, {})", self.quote_str(&json_path));
                self.cast(&extract, ty)
            }
            Self::Postgres => {
                let elements = path
                    .iter()
                    .map(|segment| match segment {
                        PathSegment::Key(key) => {
                            format!("\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
                        }
                        PathSegment::Index(index) => index.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                let path_literal = self.quote_str(&format!("{{{elements}}}"));
                match ty {
                    JsonType::Json => format!("(({expr})::jsonb #> {path_literal})"),
                    _ => self.cast(&format!("(({expr})::jsonb #>> {path_literal})"), ty),
                }
            }
        }
    }

    /// The current timestamp.
    #[must_use]
    pub const fn now(self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// Null-safe equality.
    #[must_use]
    pub fn is_not_distinct(self, lhs: &str, rhs: &str) -> String {
        match self {
            Self::Sqlite => format!("{lhs} IS {rhs}"),
            Self::Postgres => format!("{lhs} IS NOT DISTINCT FROM {rhs}"),
        }
    }

    /// An `INSERT` that silently skips rows violating a uniqueness constraint.
    #[must_use]
    pub fn insert_ignore(self, table: &str, columns: &[&str], source: &str) -> String {
        let columns = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let table = self.quote_ident(table);
        match self {
            Self::Sqlite => format!("INSERT OR IGNORE INTO {table} ({columns}) {source}"),
            Self::Postgres => {
                format!("INSERT INTO {table} ({columns}) {source} ON CONFLICT DO NOTHING")
            }
        }
    }

    /// Column definition of an auto-incrementing integer primary key.
    #[must_use]
    pub const fn serial_primary_key(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Column type for JSON documents.
    #[must_use]
    pub const fn json_type(self) -> &'static str {
        match self {
            Self::Sqlite => "TEXT",
            Self::Postgres => "JSONB",
        }
    }

    /// Column type for timestamps.
    #[must_use]
    pub const fn timestamp_type(self) -> &'static str {
        match self {
            Self::Sqlite => "TEXT",
            Self::Postgres => "TIMESTAMPTZ",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(Error::new(ErrorKind::UnknownDialect(s.to_string()))),
        }
    }
}
