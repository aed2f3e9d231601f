//! Shared schema and database setup.

use std::sync::{Arc, Mutex};

use ruleline_engine::{Callbacks, ConstraintSet, EngineConfig};
use ruleline_foundation::{Attributes, Value};
use ruleline_language::parse_constraints;
use ruleline_storage::{
    Arguments, Database, Dialect, FieldSchema, FieldType, RecordSchema, SchemaRegistry,
    SqliteDatabase,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn schema() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::new()
            .with(
                RecordSchema::new("Racer", "racers")
                    .with_field(FieldSchema::required("time", FieldType::Integer))
                    .with_field(FieldSchema::optional("team_id", FieldType::Integer))
                    .with_field(FieldSchema::optional("nickname", FieldType::Text)),
            )
            .with(
                RecordSchema::new("Team", "teams")
                    .with_field(FieldSchema::required("name", FieldType::Text)),
            )
            .with(
                RecordSchema::new("Doc", "docs")
                    .with_field(FieldSchema::required("data", FieldType::Json)),
            ),
    )
}

/// An in-memory database with every table of [`schema`] and the match store.
pub fn database() -> SqliteDatabase {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    for record in schema().iter() {
        db.execute_batch(&record.create_table_sql(Dialect::Sqlite))
            .unwrap();
    }
    EngineConfig::default()
        .match_store()
        .install(&mut db)
        .unwrap();
    db
}

pub fn constraint_set(source: &str) -> ConstraintSet {
    ConstraintSet::new(
        parse_constraints(source).unwrap(),
        schema(),
        Dialect::Sqlite,
    )
    .unwrap()
}

/// Runs a pattern's full match query and returns the arguments of every row,
/// sorted by their JSON text.
pub fn query(db: &mut SqliteDatabase, source: &str) -> Vec<Arguments> {
    let set = constraint_set(source);
    let mut out: Vec<Arguments> = db
        .query(set.sql())
        .unwrap()
        .iter()
        .map(|row| {
            Arguments::from_value(&row.value("__arguments"))
                .unwrap()
                .unwrap_or_default()
        })
        .collect();
    out.sort_by_key(Arguments::to_json);
    out
}

pub fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// Callbacks that append `event arguments` lines to `log`.
pub fn recording(log: &Log) -> Callbacks {
    let (a, b, c) = (log.clone(), log.clone(), log.clone());
    Callbacks::new()
        .on_match(move |ctx| {
            a.lock()
                .unwrap()
                .push(format!("match {}", ctx.arguments.to_json()));
            Ok(())
        })
        .on_update(move |ctx| {
            let before = ctx.previous.map(Arguments::to_json).unwrap_or_default();
            b.lock()
                .unwrap()
                .push(format!("update {before} -> {}", ctx.arguments.to_json()));
            Ok(())
        })
        .on_unmatch(move |ctx| {
            c.lock()
                .unwrap()
                .push(format!("unmatch {}", ctx.arguments.to_json()));
            Ok(())
        })
}

pub fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}
