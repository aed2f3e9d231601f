//! Conversion from the untyped parse tree to the typed [`Node`] AST.
//!
//! This stage is purely structural. It does not check that variables are
//! bound or that record types exist; those checks belong to the query
//! definer. A tree the parser could not have produced is reported as an
//! internal error.

use ruleline_foundation::{Error, Result, Value};

use crate::ast::{AggregateKind, ArithOp, CompareOp, JsonType, Node, PathSegment};
use crate::syntax::{SyntaxKind, SyntaxNode};

/// Transforms a `Pattern` (or `Block`) node into its constraints.
///
/// # Errors
/// Returns an internal error if the tree is malformed.
pub fn transform_pattern(tree: &SyntaxNode) -> Result<Vec<Node>> {
    match tree.kind {
        SyntaxKind::Pattern | SyntaxKind::Block => constraints(&tree.children),
        other => Err(malformed(other, "pattern")),
    }
}

/// Transforms a single constraint node.
///
/// # Errors
/// Returns an internal error if the tree is malformed.
pub fn transform_constraint(node: &SyntaxNode) -> Result<Node> {
    match node.kind {
        SyntaxKind::RecordMatch => {
            let clauses = node
                .children
                .iter()
                .map(|clause| match clause.kind {
                    SyntaxKind::BareBinding => Ok(Node::bare_binding(clause.text())),
                    _ => transform_expr(clause),
                })
                .collect::<Result<_>>()?;
            Ok(Node::RecordMatch {
                record_type: node.text().to_string(),
                clauses,
            })
        }
        SyntaxKind::Negation => Ok(Node::Negation(constraints(&node.children)?)),
        SyntaxKind::Any => Ok(Node::Any(constraints(&node.children)?)),
        _ => transform_expr(node),
    }
}

fn constraints(nodes: &[SyntaxNode]) -> Result<Vec<Node>> {
    nodes.iter().map(transform_constraint).collect()
}

/// Transforms an expression node.
///
/// # Errors
/// Returns an internal error if the tree is malformed.
pub fn transform_expr(node: &SyntaxNode) -> Result<Node> {
    match node.kind {
        SyntaxKind::Comparison => {
            let op = CompareOp::from_text(node.text())
                .ok_or_else(|| malformed(node.kind, "comparison operator"))?;
            let (lhs, rhs) = operands(node)?;
            Ok(Node::compare(lhs, op, rhs))
        }
        SyntaxKind::Arithmetic => {
            let op = ArithOp::from_text(node.text())
                .ok_or_else(|| malformed(node.kind, "arithmetic operator"))?;
            let (lhs, rhs) = operands(node)?;
            Ok(Node::binary(lhs, op, rhs))
        }
        SyntaxKind::Variable => Ok(Node::Variable(node.text().to_string())),
        SyntaxKind::Field => Ok(Node::RecordField(node.text().to_string())),
        SyntaxKind::Str => Ok(Node::Constant(Value::Text(node.text().to_string()))),
        SyntaxKind::Int => node
            .text()
            .parse::<i64>()
            .map(|n| Node::Constant(Value::Int(n)))
            .map_err(|_| malformed(node.kind, "integer literal")),
        SyntaxKind::Float => node
            .text()
            .parse::<f64>()
            .map(|x| Node::Constant(Value::Float(x)))
            .map_err(|_| malformed(node.kind, "float literal")),
        SyntaxKind::Bool => Ok(Node::Constant(Value::Bool(node.text() == "true"))),
        SyntaxKind::Nil => Ok(Node::Constant(Value::Nil)),
        SyntaxKind::JsonAccess => json_access(node),
        SyntaxKind::Tuple => Ok(Node::Tuple(
            node.children
                .iter()
                .map(transform_expr)
                .collect::<Result<_>>()?,
        )),
        SyntaxKind::Aggregate => aggregate(node),
        other => Err(malformed(other, "expression")),
    }
}

fn operands(node: &SyntaxNode) -> Result<(Node, Node)> {
    match node.children.as_slice() {
        [lhs, rhs] => Ok((transform_expr(lhs)?, transform_expr(rhs)?)),
        _ => Err(malformed(node.kind, "two operands")),
    }
}

fn json_access(node: &SyntaxNode) -> Result<Node> {
    let Some((base, segments)) = node.children.split_first() else {
        return Err(malformed(node.kind, "lookup base"));
    };
    let path = segments
        .iter()
        .map(|segment| match segment.kind {
            SyntaxKind::PathKey => Ok(PathSegment::Key(segment.text().to_string())),
            SyntaxKind::PathIndex => segment
                .text()
                .parse::<i64>()
                .map(PathSegment::Index)
                .map_err(|_| malformed(segment.kind, "path index")),
            other => Err(malformed(other, "path segment")),
        })
        .collect::<Result<_>>()?;
    let ty = match &node.text {
        Some(word) => JsonType::from_text(word).ok_or_else(|| malformed(node.kind, "json type"))?,
        None => JsonType::Json,
    };
    Ok(Node::JsonLookup {
        expr: Box::new(transform_expr(base)?),
        path,
        ty,
    })
}

fn aggregate(node: &SyntaxNode) -> Result<Node> {
    let kind = AggregateKind::from_text(node.text())
        .ok_or_else(|| malformed(node.kind, "aggregate function"))?;
    let (expr, block) = match node.children.as_slice() {
        [block] => (None, block),
        [projection, block] => (Some(Box::new(transform_expr(projection)?)), block),
        _ => return Err(malformed(node.kind, "aggregate block")),
    };
    Ok(Node::Aggregate {
        kind,
        expr,
        constraints: transform_pattern(block)?,
    })
}

fn malformed(kind: SyntaxKind, wanted: &str) -> Error {
    Error::internal(format!("malformed {kind:?} node: expected {wanted}"))
}
