//! Integration tests for change-impact analysis
//!
//! Each test applies a change to SQLite, activates only what the change's
//! impact selects, and checks the store against a full recomputation.

use ruleline_engine::{Callbacks, Change, EngineConfig, Impact, PendingActivation, Rule};
use ruleline_foundation::Value;
use ruleline_storage::{Arguments, Database, SqliteDatabase};

use crate::fixtures::{Log, attrs, database, query, recording, schema, take};

const TEAM_SIZE: &str = "Team(<id>)\n<n> = count { Racer(team_id = <id>) }";

fn rule(source: &str, callbacks: Callbacks) -> Rule {
    Rule::compile(
        &format!("rule r\n{source}\n"),
        schema(),
        &EngineConfig::default(),
        callbacks,
    )
    .unwrap()
}

fn seeded() -> SqliteDatabase {
    let mut db = database();
    db.execute_batch(
        "INSERT INTO teams (id, name) VALUES (1, 'red'), (2, 'blue');
         INSERT INTO racers (id, time, team_id) VALUES (1, 30, 1), (2, 12, 1), (3, 25, 2);",
    )
    .unwrap();
    db
}

/// Arguments of every match the store still wants, sorted.
fn wanted(rule: &Rule, db: &mut SqliteDatabase) -> Vec<Arguments> {
    let mut out: Vec<Arguments> = rule
        .matches(db)
        .unwrap()
        .into_iter()
        .filter_map(|row| row.next_arguments)
        .collect();
    out.sort_by_key(Arguments::to_json);
    out
}

fn pending(sink: &str, sql: &str) -> PendingActivation {
    PendingActivation {
        sink: sink.to_string(),
        sql: sql.to_string(),
    }
}

// =============================================================================
// Restricted Impact
// =============================================================================

#[test]
fn moving_a_racer_touches_both_teams() {
    let mut db = seeded();
    let rule = rule(TEAM_SIZE, Callbacks::new());
    rule.activate(&mut db, &Impact::All).unwrap();

    db.execute("UPDATE racers SET team_id = 2 WHERE id = 1")
        .unwrap();
    let change = Change::updated(
        "Racer",
        1,
        attrs(&[("time", Value::Int(30)), ("team_id", Value::Int(1))]),
        attrs(&[("time", Value::Int(30)), ("team_id", Value::Int(2))]),
    );
    let impact = rule.impact(&change);
    assert_eq!(
        impact,
        Impact::Restricted(
            [pending("team_0", "SELECT 1"), pending("team_0", "SELECT 2")]
                .into_iter()
                .collect()
        )
    );

    assert_eq!(rule.activate(&mut db, &impact).unwrap().len(), 2);
    assert_eq!(wanted(&rule, &mut db), query(&mut db, TEAM_SIZE));
}

#[test]
fn created_sink_record_restricts_to_itself() {
    let mut db = seeded();
    let rule = rule(TEAM_SIZE, Callbacks::new());
    rule.activate(&mut db, &Impact::All).unwrap();

    db.execute("INSERT INTO teams (id, name) VALUES (3, 'green')")
        .unwrap();
    let created = Change::created("Team", 3, attrs(&[("name", Value::from("green"))]));
    let impact = rule.impact(&created);
    assert_eq!(
        impact,
        Impact::Restricted([pending("team_0", "SELECT 3")].into_iter().collect())
    );
    assert_eq!(rule.activate(&mut db, &impact).unwrap().len(), 1);
    assert_eq!(wanted(&rule, &mut db).len(), 3);
}

#[test]
fn deleted_sink_record_is_retracted() {
    let mut db = seeded();
    let log = Log::default();
    let rule = rule(TEAM_SIZE, recording(&log));
    rule.activate(&mut db, &Impact::All).unwrap();
    rule.dispatch_all(&mut db, 10).unwrap();
    take(&log);

    db.execute_batch("DELETE FROM racers WHERE team_id = 2; DELETE FROM teams WHERE id = 2;")
        .unwrap();
    let racer = rule.impact(&Change::deleted(
        "Racer",
        3,
        attrs(&[("time", Value::Int(25)), ("team_id", Value::Int(2))]),
    ));
    let team = rule.impact(&Change::deleted("Team", 2, attrs(&[("name", Value::from("blue"))])));
    rule.activate(&mut db, &racer.union(team)).unwrap();
    rule.dispatch_all(&mut db, 10).unwrap();

    assert_eq!(take(&log), vec!["unmatch {\"id\":2,\"n\":1}"]);
    assert_eq!(wanted(&rule, &mut db), query(&mut db, TEAM_SIZE));
}

#[test]
fn restricted_activation_leaves_other_matches_alone() {
    let mut db = seeded();
    let rule = rule("Racer(<id>, <time>)", Callbacks::new());
    rule.activate(&mut db, &Impact::All).unwrap();

    // Changed behind the engine's back; no change reported for racer 3.
    db.execute("UPDATE racers SET time = 99 WHERE id = 3")
        .unwrap();
    db.execute("UPDATE racers SET time = 11 WHERE id = 2")
        .unwrap();
    let impact = rule.impact(&Change::updated(
        "Racer",
        2,
        attrs(&[("time", Value::Int(12))]),
        attrs(&[("time", Value::Int(11))]),
    ));
    let affected = rule.activate(&mut db, &impact).unwrap();
    assert_eq!(affected.len(), 1);

    let rows = rule.matches(&mut db).unwrap();
    let three = rows.iter().find(|r| r.ids.get("id") == Some(3)).unwrap();
    let time = three.next_arguments.as_ref().and_then(|a| a.get("time"));
    assert_eq!(time, Some(&serde_json::json!(25)));
}

// =============================================================================
// No Impact and Fallback
// =============================================================================

#[test]
fn unread_fields_have_no_impact() {
    let rule = rule(TEAM_SIZE, Callbacks::new());
    let change = Change::updated(
        "Racer",
        1,
        attrs(&[("team_id", Value::Int(1)), ("nickname", Value::Nil)]),
        attrs(&[("team_id", Value::Int(1)), ("nickname", Value::from("ace"))]),
    );
    assert_eq!(rule.impact(&change), Impact::None);

    let doc = Change::created("Doc", 1, attrs(&[("data", Value::from("{}"))]));
    assert_eq!(rule.impact(&doc), Impact::None);
}

#[test]
fn unchanged_snapshot_has_no_impact() {
    let rule = rule("Racer(<id>, <time>)", Callbacks::new());
    let snapshot = attrs(&[("time", Value::Int(5))]);
    let change = Change::updated("Racer", 1, snapshot.clone(), snapshot);
    assert!(rule.impact(&change).is_none());
}

#[test]
fn inequality_join_falls_back_to_everything() {
    let mut db = seeded();
    let source = "Racer(<id>, <time>)\nnot Racer(time < <time>)";
    let rule = rule(source, Callbacks::new());
    rule.activate(&mut db, &Impact::All).unwrap();

    db.execute("INSERT INTO racers (id, time) VALUES (4, 5)")
        .unwrap();
    let impact = rule.impact(&Change::created(
        "Racer",
        4,
        attrs(&[("time", Value::Int(5)), ("team_id", Value::Nil)]),
    ));
    assert_eq!(impact, Impact::All);
    rule.activate(&mut db, &impact).unwrap();
    assert_eq!(wanted(&rule, &mut db), query(&mut db, source));
}
