//! Unparser for constraint ASTs.
//!
//! Converts [`Node`]s back to rule-language text. The output is canonical:
//! parsing it again yields an equal AST, though layout and redundant
//! parentheses from the original text are not preserved.
//!
//! # Example
//!
//! ```
//! use ruleline_language::{parse_constraints, unparse_constraints};
//!
//! let nodes = parse_constraints("Racer(<id>,time<<t>)").unwrap();
//! assert_eq!(unparse_constraints(&nodes), "Racer(<id>, time < <t>)");
//! ```

use ruleline_foundation::Value;

use crate::ast::{JsonType, Node, PathSegment};
use crate::rule::RuleDefinition;

/// Binding strength of comparisons; operands bind tighter.
const COMPARISON: u8 = 0;
/// Binding strength of atoms and postfix lookups.
const ATOM: u8 = 3;

/// Unparses a list of constraints, one per line.
#[must_use]
pub fn unparse_constraints(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(unparse_node)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unparses a single constraint or expression.
#[must_use]
pub fn unparse_node(node: &Node) -> String {
    let mut printer = Printer::default();
    printer.constraint(node);
    printer.output
}

/// Unparses a complete rule definition.
#[must_use]
pub fn unparse_rule(rule: &RuleDefinition) -> String {
    let mut out = format!("rule {}\n", rule.name);
    for node in &rule.pattern {
        out.push_str("  ");
        out.push_str(&unparse_node(node));
        out.push('\n');
    }
    for (header, body) in [
        ("on match", &rule.on_match),
        ("on update", &rule.on_update),
        ("on unmatch", &rule.on_unmatch),
    ] {
        if let Some(body) = body {
            out.push_str(header);
            out.push('\n');
            out.push_str(body);
            if !body.is_empty() && !body.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out.push_str("end\n");
    out
}

/// Printer state.
#[derive(Default)]
struct Printer {
    output: String,
}

impl Printer {
    fn constraint(&mut self, node: &Node) {
        match node {
            Node::RecordMatch {
                record_type,
                clauses,
            } => {
                self.output.push_str(record_type);
                self.output.push('(');
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    match (clause.as_bare_binding(), clause) {
                        (Some(name), _) => self.variable(name),
                        // A lone variable clause would read back as a binding.
                        (None, Node::Variable(name)) => {
                            self.output.push('(');
                            self.variable(name);
                            self.output.push(')');
                        }
                        (None, _) => self.expr(clause),
                    }
                }
                self.output.push(')');
            }
            Node::Negation(inner) => {
                self.output.push_str("not ");
                self.block(inner);
            }
            Node::Any(inner) => {
                self.output.push_str("any ");
                self.block(inner);
            }
            other => self.expr(other),
        }
    }

    fn block(&mut self, nodes: &[Node]) {
        if nodes.is_empty() {
            self.output.push_str("{ }");
            return;
        }
        self.output.push_str("{ ");
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                self.output.push_str("; ");
            }
            self.constraint(node);
        }
        self.output.push_str(" }");
    }

    fn expr(&mut self, node: &Node) {
        match node {
            Node::Comparison { lhs, op, rhs } => {
                self.operand(lhs, COMPARISON + 1);
                self.output.push(' ');
                self.output.push_str(op.as_str());
                self.output.push(' ');
                self.operand(rhs, COMPARISON + 1);
            }
            Node::BinaryOp { lhs, op, rhs } => {
                let prec = op.precedence();
                self.operand(lhs, prec);
                self.output.push(' ');
                self.output.push_str(op.as_str());
                self.output.push(' ');
                // Left associative: an equal-strength right operand needs parens.
                self.operand(rhs, prec + 1);
            }
            Node::Variable(name) => self.variable(name),
            Node::RecordField(name) => self.output.push_str(name),
            Node::Constant(value) => self.output.push_str(&value.to_string()),
            Node::JsonLookup { expr, path, ty } => {
                self.operand(expr, ATOM + 1);
                for segment in path {
                    match segment {
                        PathSegment::Key(key) => {
                            self.output.push('[');
                            self.output.push_str(&Value::Text(key.clone()).to_string());
                            self.output.push(']');
                        }
                        PathSegment::Index(index) => {
                            self.output.push('[');
                            self.output.push_str(&index.to_string());
                            self.output.push(']');
                        }
                    }
                }
                if path.is_empty() || *ty != JsonType::Json {
                    self.output.push_str(" as ");
                    self.output.push_str(ty.as_str());
                }
            }
            Node::Tuple(elements) => {
                self.output.push('(');
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.expr(element);
                }
                if elements.len() == 1 {
                    self.output.push(',');
                }
                self.output.push(')');
            }
            Node::Aggregate {
                kind,
                expr,
                constraints,
            } => {
                self.output.push_str(kind.as_str());
                if let Some(expr) = expr {
                    self.output.push('(');
                    self.expr(expr);
                    self.output.push(')');
                }
                self.output.push(' ');
                self.block(constraints);
            }
            Node::RecordMatch { .. } | Node::Negation(_) | Node::Any(_) => self.constraint(node),
        }
    }

    /// Prints `node`, parenthesised if it binds looser than `min`.
    fn operand(&mut self, node: &Node, min: u8) {
        if strength(node) < min {
            self.output.push('(');
            self.expr(node);
            self.output.push(')');
        } else {
            self.expr(node);
        }
    }

    fn variable(&mut self, name: &str) {
        self.output.push('<');
        self.output.push_str(name);
        self.output.push('>');
    }
}

/// How tightly a node binds when printed without parentheses.
fn strength(node: &Node) -> u8 {
    match node {
        Node::Comparison { .. } => COMPARISON,
        Node::BinaryOp { op, .. } => op.precedence(),
        // Lookups and signed literals cannot take a postfix directly.
        Node::JsonLookup { .. } => ATOM,
        Node::Constant(value) if value.to_string().starts_with('-') => ATOM,
        _ => ATOM + 1,
    }
}
