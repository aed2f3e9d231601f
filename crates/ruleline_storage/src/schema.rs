//! Record schemas.
//!
//! A schema tells the compiler which table a record type lives in, which
//! column is its primary key, and which fields exist. Types may name
//! supertypes; a record of a subtype lives in the supertype's table, so a
//! change to it is relevant to patterns written against the supertype.

use std::collections::BTreeMap;

use ruleline_foundation::{Error, Result};

use crate::dialect::Dialect;

/// Storage type of a record field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 64-bit integer.
    Integer,
    /// Double precision float.
    Float,
    /// Text.
    Text,
    /// Boolean.
    Boolean,
    /// JSON document.
    Json,
}

impl FieldType {
    fn sql(self, dialect: Dialect) -> &'static str {
        match (self, dialect) {
            (Self::Integer, _) => "BIGINT",
            (Self::Float, Dialect::Sqlite) => "REAL",
            (Self::Float, Dialect::Postgres) => "DOUBLE PRECISION",
            (Self::Text, _) => "TEXT",
            (Self::Boolean, _) => "BOOLEAN",
            (Self::Json, d) => d.json_type(),
        }
    }
}

/// Schema definition for a record field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field (column) name.
    pub name: String,
    /// Field type.
    pub ty: FieldType,
    /// Whether the field may hold nil.
    pub nullable: bool,
}

impl FieldSchema {
    /// Creates a non-nullable field.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    /// Creates a nullable field.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }
}

/// Schema definition for a record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSchema {
    /// Record type name as written in patterns (e.g. `Racer`).
    pub name: String,
    /// Table holding records of this type.
    pub table: String,
    /// Integer primary key column.
    pub primary_key: String,
    /// Field definitions, excluding the primary key.
    pub fields: Vec<FieldSchema>,
    /// Direct supertypes.
    pub supertypes: Vec<String>,
}

impl RecordSchema {
    /// Creates a schema with primary key `id`.
    #[must_use]
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            supertypes: Vec::new(),
        }
    }

    /// Sets the primary key column.
    #[must_use]
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Adds a field to the schema.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a direct supertype.
    #[must_use]
    pub fn with_supertype(mut self, name: impl Into<String>) -> Self {
        self.supertypes.push(name.into());
        self
    }

    /// Returns the field schema by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if `name` is the primary key or a declared field.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        name == self.primary_key || self.field(name).is_some()
    }

    /// Returns true if the column may hold nil. The primary key never does.
    #[must_use]
    pub fn is_nullable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.nullable)
    }

    /// Renders a `CREATE TABLE` statement for this record type.
    #[must_use]
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let mut columns = vec![format!(
            "{} {}",
            dialect.quote_ident(&self.primary_key),
            dialect.serial_primary_key()
        )];
        for field in &self.fields {
            let null = if field.nullable { "" } else { " NOT NULL" };
            columns.push(format!(
                "{} {}{null}",
                dialect.quote_ident(&field.name),
                field.ty.sql(dialect)
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dialect.quote_ident(&self.table),
            columns.join(", ")
        )
    }
}

/// Registry of record schemas by type name.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, RecordSchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous one with the same name.
    pub fn register(&mut self, schema: RecordSchema) {
        self.types.insert(schema.name.clone(), schema);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, schema: RecordSchema) -> Self {
        self.register(schema);
        self
    }

    /// Returns the schema for a type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RecordSchema> {
        self.types.get(name)
    }

    /// Returns the schema for a type, or an unknown-type error.
    ///
    /// # Errors
    /// Returns `UnknownRecordType` if no schema is registered under `name`.
    pub fn require(&self, name: &str) -> Result<&RecordSchema> {
        self.get(name)
            .ok_or_else(|| Error::unknown_record_type(name))
    }

    /// Returns `name` followed by all of its transitive supertypes.
    #[must_use]
    pub fn type_chain(&self, name: &str) -> Vec<String> {
        let mut chain = vec![name.to_string()];
        let mut i = 0;
        while i < chain.len() {
            if let Some(schema) = self.get(&chain[i]) {
                for parent in &schema.supertypes {
                    if !chain.contains(parent) {
                        chain.push(parent.clone());
                    }
                }
            }
            i += 1;
        }
        chain
    }

    /// Iterates over all registered schemas.
    pub fn iter(&self) -> impl Iterator<Item = &RecordSchema> {
        self.types.values()
    }
}
