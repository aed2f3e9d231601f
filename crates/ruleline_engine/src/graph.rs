//! The join graph of a compiled pattern.
//!
//! Vertices are table aliases. An edge joins two `(alias, column)` pairs
//! that a pattern forces to be equal, either because both bind the same
//! variable in one scope, or because a nested scope binds a variable its
//! enclosing scope also binds. Edges cross scope boundaries so that a
//! change inside an aggregate or negation can be traced back to the
//! top-level aliases whose matches it affects.

use std::collections::{BTreeMap, VecDeque};

use crate::definer::{QueryDefiner, ROOT, ScopeId};

/// A vertex: one table alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vertex {
    /// Table alias.
    pub alias: String,
    /// Record type.
    pub record_type: String,
    /// Underlying table.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Scope the alias belongs to.
    pub scope: ScopeId,
}

impl Vertex {
    /// Returns true for aliases of the top-level scope.
    #[must_use]
    pub fn is_sink(&self) -> bool {
        self.scope == ROOT
    }
}

/// One direction of an equality between two columns.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    /// Vertex index the edge leaves.
    pub from: usize,
    /// Column on the `from` side.
    pub from_column: String,
    /// Vertex index the edge enters.
    pub to: usize,
    /// Column on the `to` side.
    pub to_column: String,
    /// Whether both columns may hold nil, making the join null-safe.
    pub nullable: bool,
}

impl Edge {
    fn reversed(&self) -> Self {
        Self {
            from: self.to,
            from_column: self.to_column.clone(),
            to: self.from,
            to_column: self.from_column.clone(),
            nullable: self.nullable,
        }
    }
}

/// Table aliases and the equality edges between them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinGraph {
    vertices: Vec<Vertex>,
    adjacency: Vec<Vec<Edge>>,
}

impl JoinGraph {
    /// Builds the graph of everything `definer` has defined.
    #[must_use]
    pub fn build(definer: &QueryDefiner<'_>) -> Self {
        let vertices: Vec<Vertex> = definer
            .tables()
            .iter()
            .map(|t| Vertex {
                alias: t.alias.clone(),
                record_type: t.record_type.clone(),
                table: t.table.clone(),
                primary_key: t.primary_key.clone(),
                scope: t.scope,
            })
            .collect();
        let index: BTreeMap<&str, usize> = vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v.alias.as_str(), i))
            .collect();

        let mut graph = Self {
            adjacency: vec![Vec::new(); vertices.len()],
            vertices: Vec::new(),
        };

        for scope in 0..definer.scope_count() {
            let local = definer.column_bindings(scope);
            for (name, columns) in &local {
                for (i, a) in columns.iter().enumerate() {
                    for b in &columns[i + 1..] {
                        graph.connect(&index, *a, *b);
                    }
                }
                let outer = definer
                    .parent(scope)
                    .and_then(|parent| definer.owner(parent, name));
                if let Some(outer) = outer {
                    let outer_bindings = definer.column_bindings(outer);
                    if let Some(outer_columns) = outer_bindings.get(name) {
                        for a in columns {
                            for b in outer_columns {
                                graph.connect(&index, *a, *b);
                            }
                        }
                    }
                }
            }
        }

        graph.vertices = vertices;
        for edges in &mut graph.adjacency {
            edges.sort();
            edges.dedup();
        }
        graph
    }

    fn connect(
        &mut self,
        index: &BTreeMap<&str, usize>,
        (a_alias, a_column, a_nullable): (&str, &str, bool),
        (b_alias, b_column, b_nullable): (&str, &str, bool),
    ) {
        let (Some(&from), Some(&to)) = (index.get(a_alias), index.get(b_alias)) else {
            return;
        };
        if from == to && a_column == b_column {
            return;
        }
        let edge = Edge {
            from,
            from_column: a_column.to_string(),
            to,
            to_column: b_column.to_string(),
            nullable: a_nullable && b_nullable,
        };
        self.adjacency[to].push(edge.reversed());
        self.adjacency[from].push(edge);
    }

    /// All vertices.
    #[must_use]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Edges leaving a vertex.
    #[must_use]
    pub fn edges(&self, vertex: usize) -> &[Edge] {
        &self.adjacency[vertex]
    }

    /// Index of the vertex with the given alias.
    #[must_use]
    pub fn find(&self, alias: &str) -> Option<usize> {
        self.vertices.iter().position(|v| v.alias == alias)
    }

    /// Shortest path of edges from `start` to the nearest top-level alias.
    ///
    /// A top-level start yields the empty path. Returns `None` when no
    /// top-level alias is reachable.
    #[must_use]
    pub fn path_to_sink(&self, start: usize) -> Option<Vec<Edge>> {
        let mut previous: Vec<Option<&Edge>> = vec![None; self.vertices.len()];
        let mut seen = vec![false; self.vertices.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;

        while let Some(vertex) = queue.pop_front() {
            if self.vertices[vertex].is_sink() {
                let mut path = Vec::new();
                let mut at = vertex;
                while let Some(edge) = previous[at] {
                    path.push(edge.clone());
                    at = edge.from;
                }
                path.reverse();
                return Some(path);
            }
            for edge in &self.adjacency[vertex] {
                if !seen[edge.to] {
                    seen[edge.to] = true;
                    previous[edge.to] = Some(edge);
                    queue.push_back(edge.to);
                }
            }
        }
        None
    }
}
