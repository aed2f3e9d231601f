//! The query definer: compiles constraint ASTs to SQL.
//!
//! Compilation runs in two phases. The *define* phase walks the AST and
//! accumulates, per scope, the tables referenced, the candidate expressions
//! for every variable, and the boolean conditions. The *render* phase
//! resolves each variable to one canonical SQL expression and emits a
//! single `SELECT`.
//!
//! Scopes live in an arena addressed by [`ScopeId`]; each records its
//! parent, so a variable lookup walks outwards until it finds a scope that
//! binds the name.
//!
//! # Binding by unification
//!
//! A comparison `<x> = expr` does not emit a predicate. Instead `expr`
//! becomes one more *candidate* for `x`. When `x` is resolved, candidates
//! are rendered, the shortest is chosen as canonical, and an equality
//! condition ties every other candidate to it. A variable that is also
//! bound by an enclosing scope takes the outer expression as canonical,
//! which is what correlates a sub-query with its parent.
//!
//! # Scope translations
//!
//! - `not { ... }` directly under the root becomes a `LEFT JOIN` of the
//!   inner tables whose marker column must be `NULL`; deeper negations use
//!   `NOT EXISTS`.
//! - `any { ... }` becomes `EXISTS (...)`.
//! - Aggregates become a scalar sub-query grouped by the variables shared
//!   with the outer scope, wrapped with a default for empty groups.

use std::collections::{BTreeMap, BTreeSet};

use ruleline_foundation::{Error, ErrorKind, Result, Value};
use ruleline_language::{AggregateKind, ArithOp, CompareOp, JsonType, Node, PathSegment};
use ruleline_storage::{Dialect, SchemaRegistry};

use crate::attributes::AttributeTracker;

/// Index of a scope in the definer's arena.
pub type ScopeId = usize;

/// The root scope.
pub const ROOT: ScopeId = 0;

/// Column holding the match fingerprint in compiled queries.
pub const IDS_COLUMN: &str = "__ids";

/// Column holding the callback arguments in compiled queries.
pub const ARGUMENTS_COLUMN: &str = "__arguments";

/// Prefix of fingerprint keys for top-level tables with no id variable.
pub const IMPLICIT_KEY_PREFIX: &str = "$";

/// What introduced a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// The top-level pattern.
    Root,
    /// `not { ... }`
    Negation,
    /// `any { ... }`
    Any,
    /// An aggregate sub-expression.
    Aggregate(AggregateKind),
}

/// A table referenced by a record matcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    /// Alias, unique within the whole pattern.
    pub alias: String,
    /// Record type name.
    pub record_type: String,
    /// Underlying table.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Scope the record matcher appeared in.
    pub scope: ScopeId,
}

/// An SQL expression before variable resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum Emitter {
    /// A column of an aliased table.
    Column {
        /// Table alias.
        alias: String,
        /// Column name.
        column: String,
        /// Whether the column may hold NULL.
        nullable: bool,
    },
    /// A variable reference.
    Var(String),
    /// A literal.
    Literal(Value),
    /// Arithmetic.
    Binary(Box<Emitter>, ArithOp, Box<Emitter>),
    /// A comparison used as a value or condition.
    Compare(Box<Emitter>, CompareOp, Box<Emitter>),
    /// A row value.
    Tuple(Vec<Emitter>),
    /// A JSON lookup.
    Json(Box<Emitter>, Vec<PathSegment>, JsonType),
    /// The value (aggregate) or truth (negation, any) of a nested scope.
    Scope(ScopeId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Resolution {
    InProgress,
    Done { sql: String, nullable: bool },
}

#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    kind: ScopeKind,
    projection: Option<Emitter>,
    tables: Vec<usize>,
    children: Vec<ScopeId>,
    bindings: BTreeMap<String, Vec<Emitter>>,
    conditions: Vec<Emitter>,
    resolved: BTreeMap<String, Resolution>,
    derived: Vec<String>,
    shared_keys: Vec<String>,
    rendered: Option<String>,
}

impl Scope {
    fn new(parent: Option<ScopeId>, kind: ScopeKind) -> Self {
        Self {
            parent,
            kind,
            projection: None,
            tables: Vec::new(),
            children: Vec::new(),
            bindings: BTreeMap::new(),
            conditions: Vec::new(),
            resolved: BTreeMap::new(),
            derived: Vec::new(),
            shared_keys: Vec::new(),
            rendered: None,
        }
    }
}

/// A top-level table: the unit pending activations restrict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sink {
    /// Table alias.
    pub alias: String,
    /// Record type name.
    pub record_type: String,
    /// Underlying table.
    pub table: String,
    /// Primary key column.
    pub primary_key: String,
    /// Fingerprint key holding this table's record id.
    pub key: String,
    /// Result column exposing this table's record id.
    pub column: String,
}

/// The output of compiling a root pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledQuery {
    /// The match query.
    pub sql: String,
    /// Top-level tables.
    pub sinks: Vec<Sink>,
    /// Declared id variables and the record type each identifies.
    pub id_variables: BTreeMap<String, String>,
    /// Variables passed to callbacks.
    pub arguments: Vec<String>,
}

/// Table list and predicates of one rendered scope.
#[derive(Default)]
struct Parts {
    from: Vec<String>,
    joins: Vec<String>,
    conditions: Vec<String>,
    projection: Option<String>,
}

impl Parts {
    fn from_clause(&self) -> String {
        let mut out = self.from.join(" CROSS JOIN ");
        for join in &self.joins {
            out.push(' ');
            out.push_str(join);
        }
        out
    }

    fn where_clause(&self) -> Option<String> {
        (!self.conditions.is_empty()).then(|| self.conditions.join(" AND "))
    }
}

/// Accumulates scopes, tables, bindings, and conditions for one pattern.
pub struct QueryDefiner<'s> {
    schema: &'s SchemaRegistry,
    dialect: Dialect,
    scopes: Vec<Scope>,
    tables: Vec<TableRef>,
    attributes: AttributeTracker,
    /// Left-joined negation aliases: inner alias to the join's alias.
    view: BTreeMap<String, String>,
    /// Columns exported through each left-joined negation.
    exports: BTreeMap<String, BTreeSet<(String, String)>>,
    next_join: usize,
}

impl<'s> QueryDefiner<'s> {
    /// Creates a definer with an empty root scope.
    #[must_use]
    pub fn new(schema: &'s SchemaRegistry, dialect: Dialect) -> Self {
        Self {
            schema,
            dialect,
            scopes: vec![Scope::new(None, ScopeKind::Root)],
            tables: Vec::new(),
            attributes: AttributeTracker::new(),
            view: BTreeMap::new(),
            exports: BTreeMap::new(),
            next_join: 0,
        }
    }

    /// Defines every constraint of a pattern in the root scope.
    ///
    /// # Errors
    /// Returns a compile error for unknown types or fields, or constraints
    /// used where they are not allowed.
    pub fn define_pattern(&mut self, pattern: &[Node]) -> Result<()> {
        for node in pattern {
            self.add_constraint(ROOT, node, None)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Define phase
    // -------------------------------------------------------------------------

    /// Allocates an alias for a record type in `scope`.
    ///
    /// # Errors
    /// Returns `UnknownRecordType` if the type has no schema.
    pub fn define_table(&mut self, scope: ScopeId, record_type: &str) -> Result<usize> {
        let schema = self.schema.require(record_type)?;
        let alias = format!("{}_{}", record_type.to_lowercase(), self.tables.len());
        self.tables.push(TableRef {
            alias,
            record_type: schema.name.clone(),
            table: schema.table.clone(),
            primary_key: schema.primary_key.clone(),
            scope,
        });
        self.attributes.add_type(&schema.name);
        let index = self.tables.len() - 1;
        self.scopes[scope].tables.push(index);
        Ok(index)
    }

    /// Registers a candidate expression for a variable.
    pub fn add_binding(&mut self, scope: ScopeId, name: &str, emitter: Emitter) {
        self.scopes[scope]
            .bindings
            .entry(name.to_string())
            .or_default()
            .push(emitter);
    }

    /// Registers a boolean condition.
    pub fn add_condition(&mut self, scope: ScopeId, emitter: Emitter) {
        self.scopes[scope].conditions.push(emitter);
    }

    fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.scopes.push(Scope::new(Some(parent), kind));
        let id = self.scopes.len() - 1;
        self.scopes[parent].children.push(id);
        id
    }

    fn add_constraint(&mut self, scope: ScopeId, node: &Node, table: Option<usize>) -> Result<()> {
        match node {
            Node::RecordMatch {
                record_type,
                clauses,
            } => {
                let index = self.define_table(scope, record_type)?;
                for clause in clauses {
                    self.add_predicate(scope, clause, Some(index))?;
                }
                Ok(())
            }
            Node::Negation(inner) => {
                let child = self.new_scope(scope, ScopeKind::Negation);
                for node in inner {
                    self.add_constraint(child, node, None)?;
                }
                self.add_condition(scope, Emitter::Scope(child));
                Ok(())
            }
            Node::Any(inner) => {
                let child = self.new_scope(scope, ScopeKind::Any);
                for node in inner {
                    self.add_constraint(child, node, None)?;
                }
                self.add_condition(scope, Emitter::Scope(child));
                Ok(())
            }
            other => self.add_predicate(scope, other, table),
        }
    }

    /// Adds a boolean clause, turning `<x> = expr` into a binding.
    fn add_predicate(&mut self, scope: ScopeId, node: &Node, table: Option<usize>) -> Result<()> {
        if let Node::Comparison {
            lhs,
            op: CompareOp::Eq,
            rhs,
        } = node
        {
            let lhs_var = as_variable(lhs);
            let rhs_var = as_variable(rhs);
            if lhs_var.is_some() || rhs_var.is_some() {
                if let Some(name) = lhs_var {
                    let emitter = self.emit(scope, rhs, table)?;
                    self.add_binding(scope, name, emitter);
                }
                if let Some(name) = rhs_var {
                    let emitter = self.emit(scope, lhs, table)?;
                    self.add_binding(scope, name, emitter);
                }
                return Ok(());
            }
        }
        let emitter = self.emit(scope, node, table)?;
        self.add_condition(scope, emitter);
        Ok(())
    }

    fn emit(&mut self, scope: ScopeId, node: &Node, table: Option<usize>) -> Result<Emitter> {
        Ok(match node {
            Node::Variable(name) => Emitter::Var(name.clone()),
            Node::Constant(value) => Emitter::Literal(value.clone()),
            Node::RecordField(field) => {
                let Some(index) = table else {
                    return Err(Error::invalid_constraint(format!(
                        "field '{field}' used outside a record matcher"
                    )));
                };
                let table = &self.tables[index];
                let schema = self.schema.require(&table.record_type)?;
                if !schema.has_column(field) {
                    return Err(Error::unknown_field(&table.record_type, field));
                }
                let nullable = schema.is_nullable(field);
                let (alias, record_type) = (table.alias.clone(), table.record_type.clone());
                self.attributes.add_field(&record_type, field);
                Emitter::Column {
                    alias,
                    column: field.clone(),
                    nullable,
                }
            }
            Node::BinaryOp { lhs, op, rhs } => Emitter::Binary(
                Box::new(self.emit(scope, lhs, table)?),
                *op,
                Box::new(self.emit(scope, rhs, table)?),
            ),
            Node::Comparison { lhs, op, rhs } => Emitter::Compare(
                Box::new(self.emit(scope, lhs, table)?),
                *op,
                Box::new(self.emit(scope, rhs, table)?),
            ),
            Node::JsonLookup { expr, path, ty } => {
                Emitter::Json(Box::new(self.emit(scope, expr, table)?), path.clone(), *ty)
            }
            Node::Tuple(elements) => Emitter::Tuple(
                elements
                    .iter()
                    .map(|e| self.emit(scope, e, table))
                    .collect::<Result<_>>()?,
            ),
            Node::Aggregate {
                kind,
                expr,
                constraints,
            } => {
                let child = self.new_scope(scope, ScopeKind::Aggregate(*kind));
                for node in constraints {
                    self.add_constraint(child, node, None)?;
                }
                let projection = match expr {
                    Some(expr) => Some(self.emit(child, expr, None)?),
                    None if *kind == AggregateKind::Count => None,
                    None => {
                        return Err(Error::invalid_constraint(format!(
                            "{} needs a projected expression",
                            kind.as_str()
                        )));
                    }
                };
                self.scopes[child].projection = projection;
                Emitter::Scope(child)
            }
            Node::RecordMatch { .. } | Node::Negation(_) | Node::Any(_) => {
                return Err(Error::invalid_constraint(
                    "record matchers, not, and any cannot be used as values",
                ));
            }
        })
    }

    // -------------------------------------------------------------------------
    // Accessors used by the join graph
    // -------------------------------------------------------------------------

    /// All tables, in definition order.
    #[must_use]
    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    /// The relevant-attribute map collected while defining.
    #[must_use]
    pub fn attributes(&self) -> &AttributeTracker {
        &self.attributes
    }

    /// Number of scopes.
    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Parent of a scope.
    #[must_use]
    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope].parent
    }

    /// Kind of a scope.
    #[must_use]
    pub fn kind(&self, scope: ScopeId) -> ScopeKind {
        self.scopes[scope].kind
    }

    /// Variables bound directly in `scope` with their column candidates.
    #[must_use]
    pub fn column_bindings(&self, scope: ScopeId) -> BTreeMap<&str, Vec<(&str, &str, bool)>> {
        self.scopes[scope]
            .bindings
            .iter()
            .map(|(name, candidates)| {
                let columns = candidates
                    .iter()
                    .filter_map(|c| match c {
                        Emitter::Column {
                            alias,
                            column,
                            nullable,
                        } => Some((alias.as_str(), column.as_str(), *nullable)),
                        _ => None,
                    })
                    .collect();
                (name.as_str(), columns)
            })
            .collect()
    }

    /// Nearest scope at or above `scope` that binds `name`.
    #[must_use]
    pub fn owner(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scopes[id].bindings.contains_key(name) {
                return Some(id);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    // -------------------------------------------------------------------------
    // Render phase
    // -------------------------------------------------------------------------

    /// Resolves a variable to its canonical SQL expression in `scope`.
    ///
    /// # Errors
    /// Returns `UnboundVariable` if no enclosing scope binds the name, or
    /// `CyclicBinding` if every candidate depends on the variable itself.
    pub fn resolve(&mut self, scope: ScopeId, name: &str) -> Result<String> {
        self.resolve_with_nullability(scope, name)
            .map(|(sql, _)| sql)
    }

    fn resolve_with_nullability(&mut self, scope: ScopeId, name: &str) -> Result<(String, bool)> {
        let Some(owner) = self.owner(scope, name) else {
            return Err(Error::unbound_variable(name));
        };
        match self.scopes[owner].resolved.get(name) {
            Some(Resolution::Done { sql, nullable }) => return Ok((sql.clone(), *nullable)),
            Some(Resolution::InProgress) => return Err(Error::cyclic_binding(name)),
            None => {}
        }

        self.scopes[owner]
            .resolved
            .insert(name.to_string(), Resolution::InProgress);
        let result = self.resolve_candidates(owner, name);
        match &result {
            Ok((sql, nullable)) => {
                let done = Resolution::Done {
                    sql: sql.clone(),
                    nullable: *nullable,
                };
                self.scopes[owner].resolved.insert(name.to_string(), done);
            }
            Err(_) => {
                self.scopes[owner].resolved.remove(name);
            }
        }
        result
    }

    fn resolve_candidates(&mut self, scope: ScopeId, name: &str) -> Result<(String, bool)> {
        let candidates = self.scopes[scope]
            .bindings
            .get(name)
            .cloned()
            .unwrap_or_default();
        let outer = match self.scopes[scope].parent.and_then(|p| self.owner(p, name)) {
            Some(owner) => Some(self.resolve_with_nullability(owner, name)?),
            None => None,
        };

        let mut rendered: Vec<(String, bool)> = Vec::new();
        let mut cycle = None;
        for candidate in &candidates {
            match self.render(scope, candidate) {
                Ok(sql) => rendered.push((sql, is_nullable(candidate))),
                Err(err) if matches!(err.kind, ErrorKind::CyclicBinding(_)) => {
                    cycle.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }

        if let Some((outer_sql, outer_nullable)) = outer {
            for (sql, nullable) in rendered {
                let condition = self.equality(&outer_sql, &sql, outer_nullable && nullable);
                let local = &mut self.scopes[scope];
                local.derived.push(condition);
                local.shared_keys.push(sql);
            }
            return Ok((outer_sql, outer_nullable));
        }

        if rendered.is_empty() {
            return Err(cycle.unwrap_or_else(|| Error::unbound_variable(name)));
        }
        rendered.sort_by_key(|(sql, _)| (sql.len(), sql.clone()));
        rendered.dedup_by(|a, b| a.0 == b.0);
        let (canonical, canonical_nullable) = rendered[0].clone();
        for (sql, nullable) in &rendered[1..] {
            let condition = self.equality(&canonical, sql, canonical_nullable && *nullable);
            self.scopes[scope].derived.push(condition);
        }
        Ok((canonical, canonical_nullable))
    }

    fn equality(&self, lhs: &str, rhs: &str, null_safe: bool) -> String {
        if null_safe {
            format!("({})", self.dialect.is_not_distinct(lhs, rhs))
        } else {
            format!("({lhs} = {rhs})")
        }
    }

    fn render(&mut self, scope: ScopeId, emitter: &Emitter) -> Result<String> {
        Ok(match emitter {
            Emitter::Column { alias, column, .. } => self.column(alias, column),
            Emitter::Var(name) => self.resolve(scope, name)?,
            Emitter::Literal(value) => self.dialect.literal(value),
            Emitter::Binary(lhs, op, rhs) => {
                let left = self.render(scope, lhs)?;
                let right = self.render(scope, rhs)?;
                format!("({left} {} {right})", op.as_str())
            }
            Emitter::Compare(lhs, op, rhs) => {
                let left = self.render(scope, lhs)?;
                match (op, rhs.as_ref()) {
                    (CompareOp::Eq, Emitter::Literal(Value::Nil)) => format!("({left} IS NULL)"),
                    (CompareOp::NotEq, Emitter::Literal(Value::Nil)) => {
                        format!("({left} IS NOT NULL)")
                    }
                    _ => {
                        let right = self.render(scope, rhs)?;
                        let op = match op {
                            CompareOp::NotEq => "<>",
                            other => other.as_str(),
                        };
                        format!("({left} {op} {right})")
                    }
                }
            }
            Emitter::Tuple(elements) => {
                if elements.is_empty() {
                    return Err(Error::invalid_constraint("empty tuple has no SQL form"));
                }
                let parts = elements
                    .iter()
                    .map(|e| self.render(scope, e))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(", "))
            }
            Emitter::Json(base, path, ty) => {
                let base = self.render(scope, base)?;
                self.dialect.json_lookup(&base, path, *ty)
            }
            Emitter::Scope(child) => self.render_child(*child)?,
        })
    }

    fn column(&mut self, alias: &str, column: &str) -> String {
        let d = self.dialect;
        match self.view.get(alias) {
            Some(join) => {
                self.exports
                    .entry(join.clone())
                    .or_default()
                    .insert((alias.to_string(), column.to_string()));
                format!(
                    "{}.{}",
                    d.quote_ident(join),
                    d.quote_ident(&format!("{alias}__{column}"))
                )
            }
            None => format!("{}.{}", d.quote_ident(alias), d.quote_ident(column)),
        }
    }

    /// Resolves names, renders the projection and conditions, and collects
    /// the derived equalities of one scope.
    fn render_parts(&mut self, scope: ScopeId) -> Result<Parts> {
        let mut parts = Parts::default();

        let names: Vec<String> = self.scopes[scope].bindings.keys().cloned().collect();
        for name in &names {
            self.resolve(scope, name)?;
        }

        if let Some(projection) = self.scopes[scope].projection.clone() {
            parts.projection = Some(self.render(scope, &projection)?);
        }

        let conditions = self.scopes[scope].conditions.clone();
        for condition in &conditions {
            match condition {
                Emitter::Scope(child) if self.is_left_join(*child) => {
                    let (join, marker) = self.render_left_join(*child)?;
                    parts.joins.push(join);
                    parts.conditions.push(marker);
                }
                other => {
                    let sql = self.render(scope, other)?;
                    parts.conditions.push(sql);
                }
            }
        }
        parts.conditions.append(&mut self.scopes[scope].derived);

        let d = self.dialect;
        for &index in &self.scopes[scope].tables {
            let table = &self.tables[index];
            parts.from.push(format!(
                "{} AS {}",
                d.quote_ident(&table.table),
                d.quote_ident(&table.alias)
            ));
        }
        Ok(parts)
    }

    fn is_left_join(&self, scope: ScopeId) -> bool {
        let s = &self.scopes[scope];
        s.kind == ScopeKind::Negation
            && s.parent == Some(ROOT)
            && s.children.is_empty()
            && !s.tables.is_empty()
    }

    /// Renders a top-level negation as an anti-join.
    ///
    /// The inner tables are cross joined in a derived table that exports
    /// every column the conditions use, and all conditions move to the
    /// `ON` clause so the derived table needs no correlation.
    fn render_left_join(&mut self, scope: ScopeId) -> Result<(String, String)> {
        let join = format!("neg_{}", self.next_join);
        self.next_join += 1;
        for &index in &self.scopes[scope].tables {
            let alias = self.tables[index].alias.clone();
            self.view.insert(alias, join.clone());
        }

        let parts = self.render_parts(scope)?;
        let d = self.dialect;

        let present = d.quote_ident("__present");
        let mut select = vec![format!("1 AS {present}")];
        for (alias, column) in self.exports.remove(&join).unwrap_or_default() {
            select.push(format!(
                "{}.{} AS {}",
                d.quote_ident(&alias),
                d.quote_ident(&column),
                d.quote_ident(&format!("{alias}__{column}"))
            ));
        }
        let on = parts.where_clause().unwrap_or_else(|| "1 = 1".to_string());
        let sql = format!(
            "LEFT JOIN (SELECT {} FROM {}) AS {} ON {on}",
            select.join(", "),
            parts.from_clause(),
            d.quote_ident(&join),
        );
        let marker = format!("({}.{present} IS NULL)", d.quote_ident(&join));
        Ok((sql, marker))
    }

    /// Renders a nested scope as an expression, caching the result.
    fn render_child(&mut self, scope: ScopeId) -> Result<String> {
        if let Some(sql) = &self.scopes[scope].rendered {
            return Ok(sql.clone());
        }
        let parts = self.render_parts(scope)?;
        let kind = self.scopes[scope].kind;
        let d = self.dialect;

        let where_clause = parts
            .where_clause()
            .map(|w| format!(" WHERE {w}"))
            .unwrap_or_default();
        let from_clause = if parts.from.is_empty() {
            String::new()
        } else {
            format!(" FROM {}", parts.from_clause())
        };

        let sql = match kind {
            ScopeKind::Root => return Err(Error::internal("root scope rendered as a sub-query")),
            ScopeKind::Any | ScopeKind::Negation => {
                let exists = if parts.from.is_empty() {
                    let condition = parts.where_clause().unwrap_or_else(|| "1 = 1".to_string());
                    format!("({condition})")
                } else {
                    format!("EXISTS (SELECT 1{from_clause}{where_clause})")
                };
                if kind == ScopeKind::Negation {
                    format!("(NOT {exists})")
                } else {
                    exists
                }
            }
            ScopeKind::Aggregate(aggregate) => {
                let projection = parts.projection.clone();
                let value = match (aggregate, projection) {
                    (AggregateKind::Count, None) => "count(*)".to_string(),
                    (AggregateKind::Count, Some(p)) => format!("count({p})"),
                    (AggregateKind::Sum, Some(p)) => format!("sum({p})"),
                    (AggregateKind::Min, Some(p)) => format!("min({p})"),
                    (AggregateKind::Max, Some(p)) => format!("max({p})"),
                    (AggregateKind::ArrayCollect, Some(p)) => d.json_array_agg(&p),
                    (_, None) => {
                        return Err(Error::internal("aggregate without projection"));
                    }
                };
                let shared_keys = &self.scopes[scope].shared_keys;
                let group_by = if parts.from.is_empty() || shared_keys.is_empty() {
                    String::new()
                } else {
                    format!(" GROUP BY {}", shared_keys.join(", "))
                };
                let subquery = format!("(SELECT {value}{from_clause}{where_clause}{group_by})");
                match aggregate {
                    AggregateKind::Count | AggregateKind::Sum => format!("COALESCE({subquery}, 0)"),
                    AggregateKind::ArrayCollect => {
                        format!("COALESCE({subquery}, {})", d.empty_json_array())
                    }
                    AggregateKind::Min | AggregateKind::Max => subquery,
                }
            }
        };
        self.scopes[scope].rendered = Some(sql.clone());
        Ok(sql)
    }

    /// Compiles the root scope into the match query.
    ///
    /// # Errors
    /// Returns `NoPositiveTable` if the root references no table, or any
    /// resolution error.
    pub fn to_sql(&mut self) -> Result<CompiledQuery> {
        if self.scopes[ROOT].tables.is_empty() {
            return Err(Error::new(ErrorKind::NoPositiveTable));
        }
        let parts = self.render_parts(ROOT)?;
        let d = self.dialect;

        let root_tables: Vec<TableRef> = self.scopes[ROOT]
            .tables
            .iter()
            .map(|&i| self.tables[i].clone())
            .collect();

        // Declared id variables: bound to a top-level table's primary key.
        let mut id_variables = BTreeMap::new();
        let mut id_alias: BTreeMap<String, String> = BTreeMap::new();
        for (name, candidates) in &self.scopes[ROOT].bindings {
            for candidate in candidates {
                if let Emitter::Column { alias, column, .. } = candidate {
                    if let Some(table) = root_tables
                        .iter()
                        .find(|t| &t.alias == alias && &t.primary_key == column)
                    {
                        id_variables
                            .entry(name.clone())
                            .or_insert_with(|| table.record_type.clone());
                        id_alias
                            .entry(alias.clone())
                            .or_insert_with(|| name.clone());
                    }
                }
            }
        }

        let mut ids = Vec::new();
        let mut sinks = Vec::new();
        for name in id_variables.keys() {
            ids.push((name.clone(), self.resolve(ROOT, name)?));
        }
        for table in &root_tables {
            let pk = format!(
                "{}.{}",
                d.quote_ident(&table.alias),
                d.quote_ident(&table.primary_key)
            );
            let key = match id_alias.get(&table.alias) {
                Some(name) => name.clone(),
                None => {
                    let key = format!("{IMPLICIT_KEY_PREFIX}{}", table.alias);
                    ids.push((key.clone(), pk));
                    key
                }
            };
            sinks.push(Sink {
                alias: table.alias.clone(),
                record_type: table.record_type.clone(),
                table: table.table.clone(),
                primary_key: table.primary_key.clone(),
                key,
                column: format!("__sink_{}", table.alias),
            });
        }
        ids.sort();

        let arguments: Vec<String> = self.scopes[ROOT].bindings.keys().cloned().collect();
        let mut argument_pairs = Vec::new();
        for name in &arguments {
            let sql = self.resolve(ROOT, name)?;
            let value = if self.is_array(name) {
                d.embed_json(&sql)
            } else {
                sql
            };
            argument_pairs.push((name.clone(), value));
        }

        let mut select = vec![
            format!("{} AS {}", d.json_object(&ids), d.quote_ident(IDS_COLUMN)),
            format!(
                "{} AS {}",
                d.json_object(&argument_pairs),
                d.quote_ident(ARGUMENTS_COLUMN)
            ),
        ];
        for sink in &sinks {
            select.push(format!(
                "{}.{} AS {}",
                d.quote_ident(&sink.alias),
                d.quote_ident(&sink.primary_key),
                d.quote_ident(&sink.column)
            ));
        }

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), parts.from_clause());
        if let Some(where_clause) = parts.where_clause() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        Ok(CompiledQuery {
            sql,
            sinks,
            id_variables,
            arguments,
        })
    }

    /// Whether a root variable is bound to an `array` aggregate.
    fn is_array(&self, name: &str) -> bool {
        let array = ScopeKind::Aggregate(AggregateKind::ArrayCollect);
        self.scopes[ROOT].bindings[name]
            .iter()
            .any(|c| matches!(c, Emitter::Scope(s) if self.scopes[*s].kind == array))
    }
}

fn as_variable(node: &Node) -> Option<&str> {
    match node {
        Node::Variable(name) => Some(name),
        _ => None,
    }
}

fn is_nullable(emitter: &Emitter) -> bool {
    matches!(emitter, Emitter::Column { nullable: true, .. })
}
