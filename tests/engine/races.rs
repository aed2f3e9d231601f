//! Integration tests for concurrent activation and dispatch
//!
//! Another worker is simulated by driving the match store directly between
//! the engine's own steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ruleline_engine::{Callbacks, Change, DispatchOutcome, EngineConfig, Event, Impact, Rule};
use ruleline_foundation::{ErrorKind, Result, Value};
use ruleline_storage::{Arguments, Database, Dialect, Fingerprint, MatchStore, Row, SqliteDatabase};
use serde_json::json;

use crate::fixtures::{Log, attrs, database, recording, schema, take};

const RACERS: &str = "rule racers\n  Racer(<id>, <time>)\n";

fn rule(callbacks: Callbacks) -> Rule {
    Rule::compile(RACERS, schema(), &EngineConfig::default(), callbacks).unwrap()
}

fn set_time(db: &mut SqliteDatabase, rule: &Rule, id: i64, before: i64, after: i64) {
    db.execute(&format!("UPDATE racers SET time = {after} WHERE id = {id}"))
        .unwrap();
    let change = Change::updated(
        "Racer",
        id,
        attrs(&[("time", Value::Int(before))]),
        attrs(&[("time", Value::Int(after))]),
    );
    rule.process_change(db, &change).unwrap();
}

fn racer_args(id: i64, time: i64) -> Arguments {
    Arguments::from([("id", json!(id)), ("time", json!(time))])
}

/// A connection on which another worker activates the same match just before
/// our own insert reaches the database. With `announce`, that worker also
/// dispatches it.
struct Racing<'a> {
    inner: &'a mut SqliteDatabase,
    store: MatchStore,
    competitor: Option<(i64, Fingerprint, Arguments)>,
    announce: bool,
}

impl Database for Racing<'_> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        if sql.starts_with("INSERT INTO \"rule_matches\"") {
            if let Some((rule_id, ids, args)) = self.competitor.take() {
                let id = self.store.insert(&mut *self.inner, rule_id, &ids, &args)?;
                if self.announce {
                    self.store.claim(&mut *self.inner, id)?;
                    self.store.complete(&mut *self.inner, id, &args)?;
                }
            }
        }
        self.inner.query(sql)
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.inner.execute(sql)
    }
}

// =============================================================================
// Concurrent Activation
// =============================================================================

#[test]
fn activation_recovers_from_a_concurrent_insert() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();

    // The other worker saw an older time.
    let affected = {
        let mut racing = Racing {
            inner: &mut db,
            store: rule.store().clone(),
            competitor: Some((
                rule.id().as_i64(),
                Fingerprint::from([("id", 1)]),
                racer_args(1, 7),
            )),
            announce: false,
        };
        rule.activate(&mut racing, &Impact::All).unwrap()
    };
    assert_eq!(affected.len(), 1);

    let rows = rule.matches(&mut db).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].next_arguments, Some(racer_args(1, 10)));
    assert!(rows[0].has_id_rows);

    rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(take(&log), vec!["match {\"id\":1,\"time\":10}"]);
}

#[test]
fn overwritten_announcement_is_rematched() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();

    // The other worker announced an older time before our insert landed.
    {
        let mut racing = Racing {
            inner: &mut db,
            store: rule.store().clone(),
            competitor: Some((
                rule.id().as_i64(),
                Fingerprint::from([("id", 1)]),
                racer_args(1, 7),
            )),
            announce: true,
        };
        rule.activate(&mut racing, &Impact::All).unwrap();
    }
    let rows = rule.matches(&mut db).unwrap();
    assert_eq!(rows[0].live_arguments, Some(racer_args(1, 7)));
    assert!(rows[0].rematch);

    // An update callback exists, but the conflict is announced as a rematch.
    let report = rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(report.succeeded, 1);
    let expected = vec![
        "unmatch {\"id\":1,\"time\":7}",
        "match {\"id\":1,\"time\":10}",
    ];
    assert_eq!(take(&log), expected);
    assert!(!rule.matches(&mut db).unwrap()[0].rematch);

    // Later changes go through the update callback again.
    set_time(&mut db, &rule, 1, 10, 9);
    rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(
        take(&log),
        vec!["update {\"id\":1,\"time\":10} -> {\"id\":1,\"time\":9}"]
    );
}

#[test]
fn identical_concurrent_insert_is_dispatched_once() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();

    let affected = {
        let mut racing = Racing {
            inner: &mut db,
            store: rule.store().clone(),
            competitor: Some((
                rule.id().as_i64(),
                Fingerprint::from([("id", 1)]),
                racer_args(1, 10),
            )),
            announce: false,
        };
        rule.activate(&mut racing, &Impact::All).unwrap()
    };
    // The competitor already queued it.
    assert!(affected.is_empty());
    assert_eq!(rule.pending(&mut db, 10).unwrap().len(), 1);

    let report = rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(take(&log).len(), 1);
    assert_eq!(rule.dispatch_all(&mut db, 10).unwrap().total, 0);
}

// =============================================================================
// Concurrent Dispatch
// =============================================================================

#[test]
fn claimed_match_is_skipped() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();
    let id = rule.activate(&mut db, &Impact::All).unwrap()[0];

    assert!(rule.store().claim(&mut db, id).unwrap());
    assert!(matches!(
        rule.dispatch(&mut db, id).unwrap(),
        DispatchOutcome::Skipped
    ));
    assert!(rule.pending(&mut db, 10).unwrap().is_empty());
    assert!(take(&log).is_empty());
}

#[test]
fn update_while_running_is_announced_after() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();
    let id = rule.activate(&mut db, &Impact::All).unwrap()[0];

    // Another worker claims the match and announces time 10...
    assert!(rule.store().claim(&mut db, id).unwrap());
    set_time(&mut db, &rule, 1, 10, 20);
    // ...and finishes after the time moved on.
    rule.store()
        .complete(&mut db, id, &racer_args(1, 10))
        .unwrap();

    let row = rule.store().get(&mut db, id).unwrap().unwrap();
    assert_eq!(row.live_arguments, Some(racer_args(1, 10)));
    assert!(row.is_queued());

    match rule.dispatch(&mut db, id).unwrap() {
        DispatchOutcome::Fired(events) => assert_eq!(events, vec![Event::Update]),
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(
        take(&log),
        vec!["update {\"id\":1,\"time\":10} -> {\"id\":1,\"time\":20}"]
    );
    assert!(!rule.store().get(&mut db, id).unwrap().unwrap().is_queued());
}

#[test]
fn retraction_while_running_is_announced_after() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();
    let id = rule.activate(&mut db, &Impact::All).unwrap()[0];

    assert!(rule.store().claim(&mut db, id).unwrap());
    db.execute("DELETE FROM racers WHERE id = 1").unwrap();
    let change = Change::deleted("Racer", 1, attrs(&[("time", Value::Int(10))]));
    assert_eq!(rule.process_change(&mut db, &change).unwrap(), vec![id]);
    rule.store()
        .complete(&mut db, id, &racer_args(1, 10))
        .unwrap();

    rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(take(&log), vec!["unmatch {\"id\":1,\"time\":10}"]);
    assert!(rule.matches(&mut db).unwrap().is_empty());
}

#[test]
fn crashed_worker_is_retried() {
    let log = Log::default();
    let rule = rule(recording(&log));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();
    let id = rule.activate(&mut db, &Impact::All).unwrap()[0];

    assert!(rule.store().claim(&mut db, id).unwrap());
    assert_eq!(rule.dispatch_all(&mut db, 10).unwrap().total, 0);

    assert_eq!(rule.reset_stuck(&mut db).unwrap(), 1);
    assert_eq!(rule.dispatch_all(&mut db, 10).unwrap().succeeded, 1);
    assert_eq!(take(&log), vec!["match {\"id\":1,\"time\":10}"]);
}

// =============================================================================
// Callback Failures
// =============================================================================

#[test]
fn failed_callback_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let rule = rule(Callbacks::new().on_match(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("ledger offline".into());
        }
        Ok(())
    }));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10)")
        .unwrap();
    let id = rule.activate(&mut db, &Impact::All).unwrap()[0];

    let report = rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(report.failed, 1);
    let (failed_id, err) = &report.failures[0];
    assert_eq!(*failed_id, id);
    assert!(
        matches!(&err.kind, ErrorKind::Execution { rule, message }
            if rule == "racers" && message.contains("ledger offline")),
        "{err}"
    );
    let row = rule.store().get(&mut db, id).unwrap().unwrap();
    assert!(row.is_failed());
    assert!(row.live_arguments.is_none());

    let report = rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!(report.succeeded, 1);
    let row = rule.store().get(&mut db, id).unwrap().unwrap();
    assert!(!row.is_failed());
    assert!(!row.is_queued());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn panicking_callback_is_contained() {
    let rule = rule(Callbacks::new().on_match(|ctx| {
        if ctx.id("id") == Some(2) {
            panic!("bad racer");
        }
        Ok(())
    }));
    let mut db = database();
    db.execute("INSERT INTO racers (id, time) VALUES (1, 10), (2, 20), (3, 30)")
        .unwrap();
    rule.activate(&mut db, &Impact::All).unwrap();

    let report = rule.dispatch_all(&mut db, 10).unwrap();
    assert_eq!((report.succeeded, report.failed), (2, 1));
    assert!(report.failures[0].1.to_string().contains("bad racer"));
    assert_eq!(rule.pending(&mut db, 10).unwrap().len(), 1);
}
