//! Property tests: incremental maintenance agrees with recomputation
//!
//! After any sequence of writes, each reported as a change and followed by
//! a dispatch, the announced matches of every rule must equal what its full
//! query returns against the final data.

use std::collections::BTreeSet;

use proptest::prelude::*;
use ruleline_engine::definer::{ARGUMENTS_COLUMN, IDS_COLUMN};
use ruleline_engine::{Callbacks, EngineConfig};
use ruleline_foundation::{RecordId, Value};
use ruleline_storage::{
    Arguments, Database, FieldSchema, FieldType, Fingerprint, RecordSchema, SchemaRegistry,
};

use crate::host::Host;

const RULES: &[&str] = &[
    "rule fastest\n  Racer(<id>, <time>)\n  not Racer(time < <time>)\n",
    "rule slow\n  Racer(<id>, time > 50)\n",
    "rule team_size\n  Team(<id>, <name>)\n  <n> = count { Racer(team_id = <id>) }\n",
    "rule empty_teams\n  Team(<id>)\n  not Racer(team_id = <id>)\n",
    "rule roster\n  Racer(<racer> = id, team_id = <team>)\n  Team(id = <team>, <name>)\n",
    "rule best_lap\n  Team(<id>)\n  <best> = minimum(<t>) { Racer(team_id = <id>, <t> = time) }\n",
];

#[derive(Clone, Debug)]
enum Op {
    AddRacer { time: i64, team: Option<usize> },
    AddTeam { name: String },
    SetTime { racer: usize, time: i64 },
    MoveRacer { racer: usize, team: Option<usize> },
    RenameTeam { team: usize, name: String },
    RemoveRacer { racer: usize },
    RemoveTeam { team: usize },
}

fn op() -> impl Strategy<Value = Op> {
    let slot = 0usize..8;
    prop_oneof![
        3 => (0i64..100, prop::option::of(slot.clone()))
            .prop_map(|(time, team)| Op::AddRacer { time, team }),
        2 => "[a-z]{1,4}".prop_map(|name| Op::AddTeam { name }),
        3 => (slot.clone(), 0i64..100).prop_map(|(racer, time)| Op::SetTime { racer, time }),
        2 => (slot.clone(), prop::option::of(slot.clone()))
            .prop_map(|(racer, team)| Op::MoveRacer { racer, team }),
        1 => (slot.clone(), "[a-z]{1,4}").prop_map(|(team, name)| Op::RenameTeam { team, name }),
        1 => slot.clone().prop_map(|racer| Op::RemoveRacer { racer }),
        1 => slot.prop_map(|team| Op::RemoveTeam { team }),
    ]
}

fn host() -> Host {
    let mut host = Host::new(
        SchemaRegistry::new()
            .with(
                RecordSchema::new("Racer", "racers")
                    .with_field(FieldSchema::required("time", FieldType::Integer))
                    .with_field(FieldSchema::optional("team_id", FieldType::Integer)),
            )
            .with(
                RecordSchema::new("Team", "teams")
                    .with_field(FieldSchema::required("name", FieldType::Text)),
            ),
        EngineConfig::default().with_dispatch_batch_size(5),
    );
    for source in RULES {
        host.rule(source, Callbacks::new());
    }
    host
}

fn pick(ids: &[RecordId], slot: usize) -> Option<RecordId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[slot % ids.len()])
    }
}

fn team_value(teams: &[RecordId], slot: Option<usize>) -> Value {
    slot.and_then(|s| pick(teams, s))
        .map_or(Value::Nil, Value::Int)
}

/// Applies `op`, keeping track of live record ids.
fn apply(host: &mut Host, racers: &mut Vec<RecordId>, teams: &mut Vec<RecordId>, op: &Op) {
    match op {
        Op::AddRacer { time, team } => {
            let team = team_value(teams, *team);
            racers.push(host.create("Racer", &[("time", Value::Int(*time)), ("team_id", team)]));
        }
        Op::AddTeam { name } => {
            teams.push(host.create("Team", &[("name", Value::from(name.as_str()))]));
        }
        Op::SetTime { racer, time } => {
            if let Some(id) = pick(racers, *racer) {
                host.update("Racer", id, &[("time", Value::Int(*time))]);
            }
        }
        Op::MoveRacer { racer, team } => {
            if let Some(id) = pick(racers, *racer) {
                let team = team_value(teams, *team);
                host.update("Racer", id, &[("team_id", team)]);
            }
        }
        Op::RenameTeam { team, name } => {
            if let Some(id) = pick(teams, *team) {
                host.update("Team", id, &[("name", Value::from(name.as_str()))]);
            }
        }
        Op::RemoveRacer { racer } => {
            if let Some(id) = pick(racers, *racer) {
                host.delete("Racer", id);
                racers.retain(|r| *r != id);
            }
        }
        Op::RemoveTeam { team } => {
            if let Some(id) = pick(teams, *team) {
                host.delete("Team", id);
                teams.retain(|t| *t != id);
            }
        }
    }
}

/// What each rule has announced, as `(rule, ids, arguments)` JSON text.
fn announced(host: &mut Host) -> BTreeSet<(String, String, String)> {
    let mut out = BTreeSet::new();
    for rule in host.registry.iter() {
        for row in rule.matches(&mut host.db).unwrap() {
            if let Some(live) = row.live_arguments {
                out.insert((rule.name().to_string(), row.ids.to_json(), live.to_json()));
            }
        }
    }
    out
}

/// What each rule's full query produces now.
fn recomputed(host: &mut Host) -> BTreeSet<(String, String, String)> {
    let mut out = BTreeSet::new();
    for rule in host.registry.iter() {
        for row in host.db.query(rule.constraints().sql()).unwrap() {
            let ids = Fingerprint::from_value(&row.value(IDS_COLUMN)).unwrap();
            let arguments = Arguments::from_value(&row.value(ARGUMENTS_COLUMN))
                .unwrap()
                .unwrap_or_default();
            out.insert((rule.name().to_string(), ids.to_json(), arguments.to_json()));
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn incremental_matches_converge(ops in prop::collection::vec(op(), 1..30)) {
        let mut host = host();
        let (mut racers, mut teams) = (Vec::new(), Vec::new());
        for op in &ops {
            apply(&mut host, &mut racers, &mut teams, op);
            // One batch per write, so dispatch may lag behind.
            host.dispatch();
        }
        host.settle();

        prop_assert_eq!(announced(&mut host), recomputed(&mut host));
        for rule in host.registry.iter() {
            prop_assert!(rule.pending(&mut host.db, 1).unwrap().is_empty());
        }
    }
}
