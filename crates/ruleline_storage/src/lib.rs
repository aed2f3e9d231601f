//! SQL dialects, record schemas, database access, and the match store.
//!
//! This crate provides:
//! - [`Dialect`] - Engine-specific SQL rendering
//! - [`RecordSchema`] / [`SchemaRegistry`] - Where record types live
//! - [`Database`] - The connection interface the engine runs SQL through
//! - [`SqliteDatabase`] - The bundled SQLite implementation
//! - [`MatchStore`] - Persistent match state and its state transitions

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod database;
pub mod dialect;
pub mod fingerprint;
pub mod match_store;
pub mod schema;
pub mod sqlite;

pub use database::{Database, Row};
pub use dialect::Dialect;
pub use fingerprint::{Arguments, Fingerprint};
pub use match_store::{MatchRow, MatchStore, Upsert};
pub use schema::{FieldSchema, FieldType, RecordSchema, SchemaRegistry};
pub use sqlite::SqliteDatabase;
