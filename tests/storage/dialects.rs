//! Integration tests for SQL dialects
//!
//! Tests that generated fragments run on SQLite and read as expected for
//! PostgreSQL.

use ruleline_foundation::Value;
use ruleline_language::{JsonType, PathSegment};
use ruleline_storage::{Database, Dialect, SqliteDatabase};

fn scalar(db: &mut SqliteDatabase, expr: &str) -> Value {
    db.query(&format!("SELECT {expr} AS v")).unwrap()[0].value("v")
}

// =============================================================================
// SQLite Execution
// =============================================================================

#[test]
fn literals_round_trip_through_sqlite() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    let d = Dialect::Sqlite;
    for value in [
        Value::Int(-4),
        Value::Float(2.5),
        Value::from("it's"),
        Value::Nil,
    ] {
        assert_eq!(scalar(&mut db, &d.literal(&value)), value);
    }
    assert_eq!(
        scalar(&mut db, &d.literal(&Value::Bool(true))),
        Value::Int(1)
    );
}

#[test]
fn json_object_and_lookup_run_on_sqlite() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    let d = Dialect::Sqlite;
    let object = d.json_object(&[
        ("n".to_string(), "3".to_string()),
        ("tags".to_string(), d.embed_json("'[\"a\",\"b\"]'")),
    ]);
    assert_eq!(
        scalar(&mut db, &object),
        Value::from("{\"n\":3,\"tags\":[\"a\",\"b\"]}")
    );

    let lookup = d.json_lookup(
        &object,
        &[PathSegment::Key("tags".into()), PathSegment::Index(1)],
        JsonType::Text,
    );
    assert_eq!(scalar(&mut db, &lookup), Value::from("b"));

    let last = d.json_lookup(
        &object,
        &[PathSegment::Key("tags".into()), PathSegment::Index(-1)],
        JsonType::Text,
    );
    assert_eq!(scalar(&mut db, &last), Value::from("b"));
}

#[test]
fn null_safe_equality_on_sqlite() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    let d = Dialect::Sqlite;
    assert_eq!(
        scalar(&mut db, &d.is_not_distinct("NULL", "NULL")),
        Value::Int(1)
    );
    assert_eq!(
        scalar(&mut db, &d.is_not_distinct("1", "NULL")),
        Value::Int(0)
    );
}

#[test]
fn insert_ignore_skips_duplicates() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    db.execute("CREATE TABLE t (k INTEGER UNIQUE)").unwrap();
    let sql = Dialect::Sqlite.insert_ignore("t", &["k"], "VALUES (1)");
    assert_eq!(db.execute(&sql).unwrap(), 1);
    assert_eq!(db.execute(&sql).unwrap(), 0);
}

// =============================================================================
// PostgreSQL Rendering
// =============================================================================

#[test]
fn postgres_fragments() {
    let d = Dialect::Postgres;
    assert_eq!(
        d.json_object(&[("id".to_string(), "\"r\".\"id\"".to_string())]),
        "json_build_object('id', \"r\".\"id\")"
    );
    assert_eq!(d.json_array_agg("x"), "json_agg(x)");
    assert_eq!(d.is_not_distinct("a", "b"), "a IS NOT DISTINCT FROM b");
    assert_eq!(
        d.insert_ignore("t", &["k"], "VALUES (1)"),
        "INSERT INTO \"t\" (\"k\") VALUES (1) ON CONFLICT DO NOTHING"
    );
    assert_eq!(
        d.json_lookup("doc", &[PathSegment::Key("a".into())], JsonType::Integer),
        "((doc)::jsonb #>> '{\"a\"}')::bigint"
    );
}
