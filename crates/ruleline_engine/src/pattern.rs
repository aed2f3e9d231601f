//! Compiled patterns.
//!
//! A [`ConstraintSet`] owns the constraint list of one rule together with
//! everything derived from it: the match query, the declared id
//! variables, the relevant-attribute map, and the join graph. All of it is
//! computed once, when the set is built, so a pattern that cannot compile
//! is rejected at registration rather than on its first change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ruleline_foundation::Result;
use ruleline_language::{Node, unparse_constraints};
use ruleline_storage::{Dialect, SchemaRegistry};

use crate::attributes::AttributeTracker;
use crate::definer::{ARGUMENTS_COLUMN, CompiledQuery, IDS_COLUMN, QueryDefiner, Sink};
use crate::graph::JoinGraph;
use crate::impact::{self, Change, Impact, PendingActivation};

/// A rule's pattern and its compiled forms.
#[derive(Clone, Debug)]
pub struct ConstraintSet {
    pattern: Vec<Node>,
    schema: Arc<SchemaRegistry>,
    dialect: Dialect,
    compiled: CompiledQuery,
    attributes: AttributeTracker,
    graph: JoinGraph,
}

impl ConstraintSet {
    /// Compiles a pattern.
    ///
    /// # Errors
    /// Returns a compile error if the pattern references unknown types or
    /// fields, leaves a variable unbound, binds variables cyclically, or
    /// has no top-level record matcher.
    pub fn new(pattern: Vec<Node>, schema: Arc<SchemaRegistry>, dialect: Dialect) -> Result<Self> {
        let mut definer = QueryDefiner::new(&schema, dialect);
        definer.define_pattern(&pattern)?;
        let compiled = definer.to_sql()?;
        let attributes = definer.attributes().clone();
        let graph = JoinGraph::build(&definer);
        Ok(Self {
            pattern,
            schema,
            dialect,
            compiled,
            attributes,
            graph,
        })
    }

    /// The constraint list.
    #[must_use]
    pub fn pattern(&self) -> &[Node] {
        &self.pattern
    }

    /// The dialect the query targets.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The unrestricted match query.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.compiled.sql
    }

    /// Declared id variables and the record type each identifies.
    #[must_use]
    pub fn id_variables(&self) -> &BTreeMap<String, String> {
        &self.compiled.id_variables
    }

    /// Variables passed to callbacks.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.compiled.arguments
    }

    /// Fields read per record type.
    #[must_use]
    pub fn attributes(&self) -> &AttributeTracker {
        &self.attributes
    }

    /// The join graph.
    #[must_use]
    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    /// Top-level aliases.
    #[must_use]
    pub fn sinks(&self) -> &[Sink] {
        &self.compiled.sinks
    }

    /// The fingerprint key that holds the record id of a top-level alias.
    #[must_use]
    pub fn sink_key(&self, alias: &str) -> Option<&str> {
        self.compiled
            .sinks
            .iter()
            .find(|s| s.alias == alias)
            .map(|s| s.key.as_str())
    }

    /// Returns true if `change` touches anything the pattern reads.
    #[must_use]
    pub fn is_relevant(&self, change: &Change) -> bool {
        let types = self.schema.type_chain(&change.record_type);
        self.attributes
            .is_relevant(&types, change.previous.as_ref(), change.current.as_ref())
    }

    /// The matches `change` may have affected.
    #[must_use]
    pub fn impact(&self, change: &Change) -> Impact {
        impact::analyze(
            change,
            &self.schema,
            &self.attributes,
            &self.graph,
            self.dialect,
        )
    }

    /// The match query restricted to the tuples selected by `pending`.
    #[must_use]
    pub fn restricted_sql(&self, pending: &BTreeSet<PendingActivation>) -> String {
        let d = self.dialect;
        let sinks = &self.compiled.sinks;
        let mut filters = Vec::new();
        for activation in pending {
            if let Some(sink) = sinks.iter().find(|s| s.alias == activation.sink) {
                filters.push(format!("{} IN ({})", d.quote_ident(&sink.column), activation.sql));
            }
        }
        if filters.is_empty() {
            filters.push("1 = 0".to_string());
        }
        format!(
            "SELECT {ids}, {args} FROM ({}) AS {} WHERE {}",
            self.compiled.sql,
            d.quote_ident("__match"),
            filters.join(" OR "),
            ids = d.quote_ident(IDS_COLUMN),
            args = d.quote_ident(ARGUMENTS_COLUMN),
        )
    }

    /// Renders the pattern back to rule text.
    #[must_use]
    pub fn to_source(&self) -> String {
        unparse_constraints(&self.pattern)
    }
}
