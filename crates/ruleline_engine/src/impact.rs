//! Change-impact analysis.
//!
//! Given one changed record, decides which matches of a pattern could have
//! changed and expresses that as SQL fragments selecting top-level record
//! ids. Recomputation is then restricted to tuples whose top-level alias is
//! bound to one of those ids.
//!
//! Fragments for short paths select literal ids taken from the record's
//! snapshots, so they still work after the record is deleted. Longer paths
//! join the intermediate tables as they stand now, which is sound because
//! only the changed record moved.

use std::collections::BTreeSet;

use ruleline_foundation::{Attributes, RecordId, Value};
use ruleline_storage::{Dialect, SchemaRegistry};
use tracing::warn;

use crate::attributes::AttributeTracker;
use crate::graph::{Edge, JoinGraph};

/// One record change reported by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    /// Type of the changed record.
    pub record_type: String,
    /// Its primary key.
    pub id: RecordId,
    /// Field values before the change; absent on create.
    pub previous: Option<Attributes>,
    /// Field values after the change; absent on delete.
    pub current: Option<Attributes>,
}

impl Change {
    /// A newly created record.
    #[must_use]
    pub fn created(record_type: impl Into<String>, id: RecordId, current: Attributes) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            previous: None,
            current: Some(current),
        }
    }

    /// An updated record.
    #[must_use]
    pub fn updated(
        record_type: impl Into<String>,
        id: RecordId,
        previous: Attributes,
        current: Attributes,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            previous: Some(previous),
            current: Some(current),
        }
    }

    /// A deleted record.
    #[must_use]
    pub fn deleted(record_type: impl Into<String>, id: RecordId, previous: Attributes) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            previous: Some(previous),
            current: None,
        }
    }

    fn snapshots(&self) -> impl Iterator<Item = &Attributes> {
        self.previous.iter().chain(self.current.iter())
    }
}

/// Restricts recomputation to tuples whose `sink` alias is bound to a
/// record id selected by `sql`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingActivation {
    /// Top-level alias being restricted.
    pub sink: String,
    /// Query selecting candidate record ids for that alias.
    pub sql: String,
}

/// The matches a change may have affected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Impact {
    /// Nothing the pattern reads changed.
    None,
    /// Impact could not be localised; every match must be recomputed.
    All,
    /// Only tuples selected by these activations may have changed.
    Restricted(BTreeSet<PendingActivation>),
}

impl Impact {
    /// Returns true if no recomputation is needed.
    #[must_use]
    pub fn is_none(&self) -> bool {
        match self {
            Self::None => true,
            Self::All => false,
            Self::Restricted(set) => set.is_empty(),
        }
    }

    /// Combines two impacts, keeping the broader of the two.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::None, other) | (other, Self::None) => other,
            (Self::Restricted(mut a), Self::Restricted(b)) => {
                a.extend(b);
                Self::Restricted(a)
            }
        }
    }
}

/// Computes the impact of `change` on a pattern.
///
/// The caller supplies the pattern's relevant attributes and join graph.
#[must_use]
pub fn analyze(
    change: &Change,
    schema: &SchemaRegistry,
    attributes: &AttributeTracker,
    graph: &JoinGraph,
    dialect: Dialect,
) -> Impact {
    let types = schema.type_chain(&change.record_type);
    if change.previous == change.current
        || !attributes.is_relevant(&types, change.previous.as_ref(), change.current.as_ref())
    {
        return Impact::None;
    }

    let mut pending = BTreeSet::new();
    for (start, vertex) in graph.vertices().iter().enumerate() {
        if !types.contains(&vertex.record_type) {
            continue;
        }
        let Some(path) = graph.path_to_sink(start) else {
            warn!(
                alias = %vertex.alias,
                record_type = %change.record_type,
                reason = "no join path",
                "rule.impact.fallback"
            );
            return Impact::All;
        };
        let sink = match path.last() {
            Some(edge) => &graph.vertices()[edge.to],
            None => vertex,
        };
        for snapshot in change.snapshots() {
            match fragment(change.id, snapshot, graph, &path, dialect) {
                Some(sql) => {
                    pending.insert(PendingActivation {
                        sink: sink.alias.clone(),
                        sql,
                    });
                }
                None => {
                    warn!(
                        alias = %vertex.alias,
                        record_type = %change.record_type,
                        reason = "snapshot lacks joined field",
                        "rule.impact.fallback"
                    );
                    return Impact::All;
                }
            }
        }
    }
    Impact::Restricted(pending)
}

/// Value of `column` in a snapshot of the changed record.
fn snapshot_value(
    id: RecordId,
    primary_key: &str,
    snapshot: &Attributes,
    column: &str,
) -> Option<Value> {
    if column == primary_key {
        return Some(Value::Int(id));
    }
    snapshot.get(column).cloned()
}

/// SQL selecting the ids of the sink at the end of `path` that a record
/// with `snapshot` joins to.
fn fragment(
    id: RecordId,
    snapshot: &Attributes,
    graph: &JoinGraph,
    path: &[Edge],
    dialect: Dialect,
) -> Option<String> {
    let Some(first) = path.first() else {
        return Some(format!("SELECT {id}"));
    };
    let start = &graph.vertices()[first.from];
    let seed = snapshot_value(id, &start.primary_key, snapshot, &first.from_column)?;

    let sink = &graph.vertices()[path[path.len() - 1].to];
    if path.len() == 1 && first.to_column == sink.primary_key {
        return Some(format!("SELECT {}", dialect.literal(&seed)));
    }

    let d = dialect;
    let mut tables = Vec::new();
    let mut conditions = Vec::new();
    let column = |step: usize, name: &str| {
        let alias = d.quote_ident(&format!("__p{step}"));
        format!("{alias}.{}", d.quote_ident(name))
    };
    for (step, edge) in path.iter().enumerate() {
        let vertex = &graph.vertices()[edge.to];
        tables.push(format!(
            "{} AS {}",
            d.quote_ident(&vertex.table),
            d.quote_ident(&format!("__p{step}"))
        ));
        let lhs = column(step, &edge.to_column);
        let rhs = if step == 0 {
            d.literal(&seed)
        } else {
            column(step - 1, &edge.from_column)
        };
        conditions.push(if edge.nullable {
            format!("({})", d.is_not_distinct(&lhs, &rhs))
        } else {
            format!("({lhs} = {rhs})")
        });
    }
    Some(format!(
        "SELECT {} FROM {} WHERE {}",
        column(path.len() - 1, &sink.primary_key),
        tables.join(" CROSS JOIN "),
        conditions.join(" AND ")
    ))
}
