//! Integration tests for constraint parsing
//!
//! Tests parsing of rule patterns to the typed AST.

use ruleline_foundation::{ErrorKind, Value};
use ruleline_language::{
    AggregateKind, ArithOp, CompareOp, JsonType, Node, PathSegment, parse_constraints,
};

fn record(record_type: &str, clauses: Vec<Node>) -> Node {
    Node::RecordMatch {
        record_type: record_type.to_string(),
        clauses,
    }
}

// =============================================================================
// Record Matchers
// =============================================================================

#[test]
fn parse_fastest_racer() {
    let nodes = parse_constraints("Racer(<id>, <time>)\nnot Racer(time < <time>)").unwrap();
    assert_eq!(
        nodes,
        vec![
            record(
                "Racer",
                vec![Node::bare_binding("id"), Node::bare_binding("time")]
            ),
            Node::Negation(vec![record(
                "Racer",
                vec![Node::compare(Node::field("time"), CompareOp::Lt, Node::var("time"))]
            )]),
        ]
    );
}

#[test]
fn parse_renamed_binding() {
    let nodes = parse_constraints("Enrollment(<s> = student_id)").unwrap();
    assert_eq!(
        nodes,
        vec![record(
            "Enrollment",
            vec![Node::compare(Node::var("s"), CompareOp::Eq, Node::field("student_id"))]
        )]
    );
}

#[test]
fn parse_literal_clauses() {
    let nodes = parse_constraints("Item(kind = \"box\", size >= 3, fragile = false, label = nil)")
        .unwrap();
    let Node::RecordMatch { clauses, .. } = &nodes[0] else {
        panic!("expected record match");
    };
    assert_eq!(
        clauses[0],
        Node::compare(
            Node::field("kind"),
            CompareOp::Eq,
            Node::Constant("box".into())
        )
    );
    assert_eq!(
        clauses[1],
        Node::compare(
            Node::field("size"),
            CompareOp::GtEq,
            Node::Constant(3.into())
        )
    );
    assert_eq!(
        clauses[2],
        Node::compare(
            Node::field("fragile"),
            CompareOp::Eq,
            Node::Constant(false.into())
        )
    );
    assert_eq!(
        clauses[3],
        Node::compare(
            Node::field("label"),
            CompareOp::Eq,
            Node::Constant(Value::Nil)
        )
    );
}

// =============================================================================
// Expressions
// =============================================================================

#[test]
fn arithmetic_precedence() {
    let nodes = parse_constraints("<a> = 1 + 2 * 3").unwrap();
    assert_eq!(
        nodes,
        vec![Node::compare(
            Node::var("a"),
            CompareOp::Eq,
            Node::binary(
                Node::Constant(1.into()),
                ArithOp::Add,
                Node::binary(
                    Node::Constant(2.into()),
                    ArithOp::Mul,
                    Node::Constant(3.into())
                )
            )
        )]
    );
}

#[test]
fn subtraction_is_left_associative() {
    let nodes = parse_constraints("<a> = 10 - 4 - 3").unwrap();
    assert_eq!(
        nodes,
        vec![Node::compare(
            Node::var("a"),
            CompareOp::Eq,
            Node::binary(
                Node::binary(
                    Node::Constant(10.into()),
                    ArithOp::Sub,
                    Node::Constant(4.into())
                ),
                ArithOp::Sub,
                Node::Constant(3.into())
            )
        )]
    );
}

#[test]
fn json_lookup_with_type() {
    let nodes = parse_constraints("Doc(data[\"tags\"][0] as text = <tag>)").unwrap();
    let Node::RecordMatch { clauses, .. } = &nodes[0] else {
        panic!("expected record match");
    };
    assert_eq!(
        clauses[0],
        Node::compare(
            Node::JsonLookup {
                expr: Box::new(Node::field("data")),
                path: vec![PathSegment::Key("tags".into()), PathSegment::Index(0)],
                ty: JsonType::Text,
            },
            CompareOp::Eq,
            Node::var("tag")
        )
    );
}

#[test]
fn tuple_binding() {
    let nodes = parse_constraints("(<a>, <b>) = (1, 2)").unwrap();
    assert_eq!(
        nodes,
        vec![Node::compare(
            Node::Tuple(vec![Node::var("a"), Node::var("b")]),
            CompareOp::Eq,
            Node::Tuple(vec![Node::Constant(1.into()), Node::Constant(2.into())])
        )]
    );
}

// =============================================================================
// Scopes
// =============================================================================

#[test]
fn aggregate_with_expression() {
    let nodes = parse_constraints(
        "Course(<id>)\n<seats> = sum(<n>) { Section(course_id = <id>, <n> = size) }",
    )
    .unwrap();
    let Node::Comparison { lhs, rhs, .. } = &nodes[1] else {
        panic!("expected comparison");
    };
    assert_eq!(**lhs, Node::var("seats"));
    let Node::Aggregate {
        kind,
        expr,
        constraints,
    } = rhs.as_ref()
    else {
        panic!("expected aggregate");
    };
    assert_eq!(*kind, AggregateKind::Sum);
    assert_eq!(expr.as_deref(), Some(&Node::var("n")));
    assert_eq!(constraints.len(), 1);
}

#[test]
fn nested_scopes() {
    let nodes = parse_constraints(
        "Team(<id>)\nnot {\n  Racer(team_id = <id>, <t> = time)\n  \
         any { Penalty(racer_time = <t>) }\n}",
    )
    .unwrap();
    let Node::Negation(inner) = &nodes[1] else {
        panic!("expected negation");
    };
    assert_eq!(inner.len(), 2);
    assert!(matches!(inner[1], Node::Any(ref any) if any.len() == 1));
}

#[test]
fn semicolons_separate_constraints() {
    let a = parse_constraints("Racer(<id>); <id> > 3").unwrap();
    let b = parse_constraints("Racer(<id>)\n<id> > 3").unwrap();
    assert_eq!(a, b);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn error_reports_position() {
    let err = parse_constraints("Racer(<id>)\nRacer(time <)").unwrap_err();
    let ErrorKind::ParseError {
        line, context, ..
    } = &err.kind
    else {
        panic!("expected parse error, got {err}");
    };
    assert_eq!(*line, 2);
    assert_eq!(context, "Racer(time <)");
}

#[test]
fn unclosed_block_is_error() {
    assert!(parse_constraints("not { Racer(<id>)").is_err());
}

#[test]
fn empty_pattern_parses_to_nothing() {
    assert!(parse_constraints("").unwrap().is_empty());
    assert!(parse_constraints("\n\n").unwrap().is_empty());
}
