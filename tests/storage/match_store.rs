//! Integration tests for the match store
//!
//! Tests concurrent-writer recovery and worker crash handling against SQLite.

use ruleline_foundation::Result;
use ruleline_storage::{
    Arguments, Database, Dialect, Fingerprint, MatchStore, Row, SqliteDatabase, Upsert,
};
use serde_json::json;

fn store() -> MatchStore {
    MatchStore::new(Dialect::Sqlite, "rule_matches", "rule_match_ids")
}

fn setup() -> SqliteDatabase {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    store().install(&mut db).unwrap();
    db
}

fn args(n: i64) -> Arguments {
    Arguments::from([("n", json!(n))])
}

/// A connection on which another writer inserts the same match just before
/// our own first insert reaches the database.
struct Racing<'a> {
    inner: &'a mut SqliteDatabase,
    competitor: Option<(i64, Fingerprint, Arguments)>,
}

impl Database for Racing<'_> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        if sql.starts_with("INSERT INTO \"rule_matches\"") {
            if let Some((rule_id, ids, args)) = self.competitor.take() {
                store().insert(&mut *self.inner, rule_id, &ids, &args)?;
            }
        }
        self.inner.query(sql)
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.inner.execute(sql)
    }
}

// =============================================================================
// Race Recovery
// =============================================================================

#[test]
fn upsert_recovers_from_a_concurrent_insert() {
    let mut db = setup();
    let ids = Fingerprint::from([("racer", 4)]);
    {
        let mut racing = Racing {
            inner: &mut db,
            competitor: Some((9, ids.clone(), args(1))),
        };
        let outcome = store().upsert(&mut racing, 9, &ids, &args(2)).unwrap();
        assert!(matches!(outcome, Upsert::Updated(_)), "{outcome:?}");
    }

    let rows = store().matches(&mut db, 9).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].next_arguments, Some(args(2)));
    assert!(rows[0].is_queued());
}

#[test]
fn recovery_with_equal_arguments_is_unchanged() {
    let mut db = setup();
    let ids = Fingerprint::from([("racer", 4)]);
    let mut racing = Racing {
        inner: &mut db,
        competitor: Some((9, ids.clone(), args(1))),
    };
    let outcome = store().upsert(&mut racing, 9, &ids, &args(1)).unwrap();
    assert!(matches!(outcome, Upsert::Unchanged(_)), "{outcome:?}");
}

#[test]
fn other_errors_are_not_recovered() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    let err = store()
        .insert_or_recover(&mut db, 1, &Fingerprint::from([("id", 1)]), &args(1))
        .unwrap_err();
    assert!(!err.is_concurrency_conflict());
}

// =============================================================================
// Worker Lifecycle
// =============================================================================

#[test]
fn crashed_worker_is_reset() {
    let mut db = setup();
    let store = store();
    let a = store
        .insert(&mut db, 1, &Fingerprint::from([("id", 1)]), &args(1))
        .unwrap();
    let b = store
        .insert(&mut db, 1, &Fingerprint::from([("id", 2)]), &args(2))
        .unwrap();

    assert!(store.claim(&mut db, a).unwrap());
    assert_eq!(store.claimable(&mut db, 1, 10).unwrap(), vec![b]);
    assert_eq!(store.claimable(&mut db, 1, 1).unwrap(), vec![b]);

    // The worker holding `a` never reports back.
    assert_eq!(store.reset_stuck(&mut db, 1).unwrap(), 1);
    assert_eq!(store.claimable(&mut db, 1, 10).unwrap(), vec![a, b]);
    assert_eq!(store.reset_stuck(&mut db, 1).unwrap(), 0);
}

#[test]
fn rules_do_not_share_matches() {
    let mut db = setup();
    let store = store();
    let ids = Fingerprint::from([("id", 1)]);
    store.insert(&mut db, 1, &ids, &args(1)).unwrap();
    store.insert(&mut db, 2, &ids, &args(1)).unwrap();
    store.backfill_id_rows(&mut db, 1).unwrap();

    assert_eq!(store.matches(&mut db, 1).unwrap().len(), 1);
    assert_eq!(store.matches(&mut db, 2).unwrap().len(), 1);
    assert_eq!(
        store.matches_for_record(&mut db, 1, "id", 1).unwrap().len(),
        1
    );
    assert!(
        store
            .matches_for_record(&mut db, 2, "id", 1)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn custom_table_names() {
    let mut db = SqliteDatabase::open_in_memory().unwrap();
    let store = MatchStore::new(Dialect::Sqlite, "my matches", "my ids");
    store.install(&mut db).unwrap();
    store.install(&mut db).unwrap();
    let id = store
        .insert(&mut db, 1, &Fingerprint::from([("id", 1)]), &args(1))
        .unwrap();
    assert_eq!(store.get(&mut db, id).unwrap().unwrap().rule_id, 1);
}
