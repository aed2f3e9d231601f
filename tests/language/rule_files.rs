//! Integration tests for rule files
//!
//! Tests splitting a file into rules, callback sections, and error isolation.

use ruleline_foundation::ErrorKind;
use ruleline_language::{parse_rule, parse_rules, unparse_rule};

const COURSES: &str = "\
# Enrollment rules

rule early_enrollments
  Course(<course_id>)
  <early> = count { Enrollment(course_id = <course_id>, day < 3) }
on match
  notify(course_id, early)
on update
  refresh(course_id, early)
on unmatch
  retract(course_id)
end

rule fastest_racer
  Racer(<id>, <time>)
  not Racer(time < <time>)
on match
  crown(id)
";

#[test]
fn file_with_two_rules() {
    let rules: Vec<_> = parse_rules(COURSES)
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rules.len(), 2);

    assert_eq!(rules[0].name, "early_enrollments");
    assert_eq!(rules[0].pattern.len(), 2);
    assert_eq!(
        rules[0].on_match.as_deref(),
        Some("  notify(course_id, early)")
    );
    assert_eq!(
        rules[0].on_update.as_deref(),
        Some("  refresh(course_id, early)")
    );
    assert_eq!(rules[0].on_unmatch.as_deref(), Some("  retract(course_id)"));

    // The trailing `end` is optional.
    assert_eq!(rules[1].name, "fastest_racer");
    assert_eq!(rules[1].on_match.as_deref(), Some("  crown(id)"));
    assert_eq!(rules[1].on_unmatch, None);
}

#[test]
fn rule_without_callbacks() {
    let rule = parse_rule("rule bare\n  Racer(<id>)\nend\n").unwrap();
    assert_eq!(rule.on_match, None);
    assert_eq!(rule.on_update, None);
    assert_eq!(rule.on_unmatch, None);
}

#[test]
fn unparsed_rule_reads_back() {
    for rule in parse_rules(COURSES) {
        let rule = rule.unwrap();
        assert_eq!(parse_rule(&unparse_rule(&rule)).unwrap(), rule);
    }
}

#[test]
fn broken_pattern_names_its_rule() {
    let source = "rule ok\n  Racer(<id>)\n\nrule broken\n  Racer(<id>\n";
    let results = parse_rules(source);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());

    let err = results[1].as_ref().unwrap_err();
    assert!(
        matches!(err.kind, ErrorKind::ParseError { line: 5, .. }),
        "{err}"
    );
    assert_eq!(
        err.context.as_ref().and_then(|c| c.rule.as_deref()),
        Some("broken")
    );
}

#[test]
fn invalid_rule_name() {
    let err = parse_rule("rule has spaces\n  Racer(<id>)\n").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ParseError { .. }));
}

#[test]
fn text_after_end_is_rejected() {
    assert!(parse_rule("rule a\n  Racer(<id>)\nend\n  Racer(<x>)\n").is_err());
}

#[test]
fn parse_rule_wants_exactly_one() {
    assert!(parse_rule("").is_err());
    assert!(parse_rule("rule a\n  Racer(<id>)\nrule b\n  Racer(<id>)\n").is_err());
}
