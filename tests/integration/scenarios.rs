//! End-to-end rule scenarios

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ruleline_engine::{CallbackContext, CallbackError, Callbacks, EngineConfig};
use ruleline_foundation::{ErrorKind, Value};
use ruleline_storage::{FieldSchema, FieldType, RecordSchema, SchemaRegistry};

use crate::host::{Host, Log, recording, take};

// =============================================================================
// Fastest Racer
// =============================================================================

fn racing() -> Host {
    Host::new(
        SchemaRegistry::new().with(
            RecordSchema::new("Racer", "racers")
                .with_field(FieldSchema::required("time", FieldType::Integer)),
        ),
        EngineConfig::default(),
    )
}

const FASTEST: &str = "\
rule fastest
  Racer(<id>, <time>)
  not Racer(time < <time>)
end
";

#[test]
fn faster_racer_takes_over() {
    let log = Log::default();
    let mut host = racing();
    host.rule(FASTEST, recording(&log, true));

    host.create("Racer", &[("time", Value::Int(10))]);
    host.settle();
    assert_eq!(take(&log), vec!["match {\"id\":1,\"time\":10}"]);

    host.create("Racer", &[("time", Value::Int(5))]);
    host.settle();
    assert_eq!(
        take(&log),
        vec![
            "unmatch {\"id\":1,\"time\":10}",
            "match {\"id\":2,\"time\":5}",
        ]
    );

    // A slower racer changes nothing.
    host.create("Racer", &[("time", Value::Int(7))]);
    host.settle();
    assert!(take(&log).is_empty());
}

#[test]
fn tied_racers_both_win() {
    let log = Log::default();
    let mut host = racing();
    host.rule(FASTEST, recording(&log, true));

    host.create("Racer", &[("time", Value::Int(10))]);
    let b = host.create("Racer", &[("time", Value::Int(12))]);
    host.settle();
    take(&log);

    host.update("Racer", b, &[("time", Value::Int(10))]);
    host.settle();
    assert_eq!(take(&log), vec!["match {\"id\":2,\"time\":10}"]);

    host.delete("Racer", b);
    host.settle();
    assert_eq!(take(&log), vec!["unmatch {\"id\":2,\"time\":10}"]);
}

// =============================================================================
// Early Enrollment Counts
// =============================================================================

fn school() -> Host {
    Host::new(
        SchemaRegistry::new()
            .with(
                RecordSchema::new("Course", "courses")
                    .with_field(FieldSchema::required("title", FieldType::Text)),
            )
            .with(
                RecordSchema::new("Enrollment", "enrollments")
                    .with_field(FieldSchema::required("student_id", FieldType::Integer))
                    .with_field(FieldSchema::required("course_id", FieldType::Integer))
                    .with_field(FieldSchema::required("early", FieldType::Boolean)),
            ),
        EngineConfig::default(),
    )
}

const EARLY: &str = "\
rule early_enrollments
  Course(<course_id> = id)
  <n> = count(<student>) {
    Enrollment(<student> = student_id, course_id = <course_id>, early = true)
  }
end
";

#[test]
fn enrollment_count_is_updated_in_place() {
    let log = Log::default();
    let mut host = school();
    host.rule(EARLY, recording(&log, true));

    let course = host.create("Course", &[("title", Value::from("Rust"))]);
    host.settle();
    assert_eq!(take(&log), vec!["match {\"course_id\":1,\"n\":0}"]);

    let enrollment = host.create(
        "Enrollment",
        &[
            ("student_id", Value::Int(7)),
            ("course_id", Value::Int(course)),
            ("early", Value::Bool(true)),
        ],
    );
    host.settle();
    assert_eq!(take(&log), vec!["update {\"course_id\":1,\"n\":1}"]);

    // Late enrollments are not counted.
    host.create(
        "Enrollment",
        &[
            ("student_id", Value::Int(8)),
            ("course_id", Value::Int(course)),
            ("early", Value::Bool(false)),
        ],
    );
    host.settle();
    assert!(take(&log).is_empty());

    host.update("Enrollment", enrollment, &[("early", Value::Bool(false))]);
    host.settle();
    assert_eq!(take(&log), vec!["update {\"course_id\":1,\"n\":0}"]);

    host.delete("Course", course);
    host.settle();
    assert_eq!(take(&log), vec!["unmatch {\"course_id\":1,\"n\":0}"]);
}

#[test]
fn without_update_callback_changes_rematch() {
    let log = Log::default();
    let mut host = school();
    host.rule(EARLY, recording(&log, false));

    let course = host.create("Course", &[("title", Value::from("Rust"))]);
    host.settle();
    take(&log);

    host.create(
        "Enrollment",
        &[
            ("student_id", Value::Int(7)),
            ("course_id", Value::Int(course)),
            ("early", Value::Bool(true)),
        ],
    );
    host.settle();
    assert_eq!(
        take(&log),
        vec![
            "unmatch {\"course_id\":1,\"n\":0}",
            "match {\"course_id\":1,\"n\":1}"
        ]
    );
}

// =============================================================================
// Failing Callbacks
// =============================================================================

fn divide(ctx: &CallbackContext<'_>, total: &AtomicUsize) -> Result<(), CallbackError> {
    let (Value::Int(num), Value::Int(den)) = (ctx.value("num"), ctx.value("den")) else {
        return Err("non-integer fraction".into());
    };
    let quotient = num.checked_div(den).ok_or("division by zero")?;
    total.fetch_add(usize::try_from(quotient)?, Ordering::SeqCst);
    Ok(())
}

#[test]
fn failing_callback_is_retried_after_a_fix() {
    let mut host = Host::new(
        SchemaRegistry::new().with(
            RecordSchema::new("Fraction", "fractions")
                .with_field(FieldSchema::required("num", FieldType::Integer))
                .with_field(FieldSchema::required("den", FieldType::Integer)),
        ),
        EngineConfig::default(),
    );
    let quotients = Arc::new(AtomicUsize::new(0));
    let (on_match, on_update) = (Arc::clone(&quotients), Arc::clone(&quotients));
    host.rule(
        "rule quotients\n  Fraction(<id>, <num>, <den>)\n",
        Callbacks::new()
            .on_match(move |ctx| divide(ctx, &on_match))
            .on_update(move |ctx| divide(ctx, &on_update)),
    );

    host.create(
        "Fraction",
        &[("num", Value::Int(6)), ("den", Value::Int(3))],
    );
    let broken = host.create(
        "Fraction",
        &[("num", Value::Int(1)), ("den", Value::Int(0))],
    );
    host.create(
        "Fraction",
        &[("num", Value::Int(8)), ("den", Value::Int(2))],
    );

    let report = host.dispatch();
    assert_eq!((report.total, report.succeeded, report.failed), (3, 2, 1));
    assert!(matches!(
        &report.failures[0].1.kind,
        ErrorKind::Execution { message, .. } if message.contains("division by zero")
    ));
    assert_eq!(quotients.load(Ordering::SeqCst), 6);

    // Still failing on retry.
    let report = host.dispatch();
    assert_eq!((report.total, report.failed), (1, 1));

    host.update("Fraction", broken, &[("den", Value::Int(1))]);
    let report = host.dispatch();
    assert_eq!((report.total, report.succeeded), (1, 1));
    assert_eq!(quotients.load(Ordering::SeqCst), 7);
    assert_eq!(host.dispatch().total, 0);
}
