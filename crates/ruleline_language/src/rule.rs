//! Rule definitions and rule-file splitting.
//!
//! A rule file is line oriented:
//!
//! ```text
//! rule fastest_racer
//!   Racer(<id>, <time>)
//!   not Racer(time < <time>)
//! on match
//!   announce(id)
//! end
//! ```
//!
//! The pattern lines are parsed into [`Node`]s. Callback sections are host
//! source and are captured verbatim.

use ruleline_foundation::{Error, ErrorContext, Result};

use crate::ast::Node;
use crate::parser::Parser;
use crate::transform::transform_pattern;

/// A parsed rule: its name, pattern, and raw callback sources.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDefinition {
    /// Rule name, unique within a registry.
    pub name: String,
    /// Top-level constraints.
    pub pattern: Vec<Node>,
    /// Source of the `on match` section.
    pub on_match: Option<String>,
    /// Source of the `on update` section.
    pub on_update: Option<String>,
    /// Source of the `on unmatch` section.
    pub on_unmatch: Option<String>,
}

impl RuleDefinition {
    /// Creates a rule with no callback sections.
    #[must_use]
    pub fn new(name: impl Into<String>, pattern: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            pattern,
            on_match: None,
            on_update: None,
            on_unmatch: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Match,
    Update,
    Unmatch,
}

impl Section {
    fn from_header(line: &str) -> Option<Self> {
        match line.trim() {
            "on match" => Some(Self::Match),
            "on update" => Some(Self::Update),
            "on unmatch" => Some(Self::Unmatch),
            _ => None,
        }
    }
}

/// One line of the source, without its terminator.
struct Line<'a> {
    text: &'a str,
    start: usize,
    number: u32,
}

fn lines(source: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, raw) in source.split_inclusive('\n').enumerate() {
        let text = raw.trim_end_matches('\n').trim_end_matches('\r');
        out.push(Line {
            text,
            start,
            number: u32::try_from(i + 1).unwrap_or(u32::MAX),
        });
        start += raw.len();
    }
    out
}

fn is_rule_header(line: &str) -> bool {
    line == "rule" || line.starts_with("rule ")
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

fn line_error(line: &Line<'_>, message: impl Into<String>) -> Error {
    Error::parse(message, line.number, 1, line.text.to_string())
}

/// Parses every rule in `source`.
///
/// Each rule is parsed independently; one malformed rule yields an `Err`
/// entry without affecting the others. Errors carry the rule name in their
/// context when it is known.
#[must_use]
pub fn parse_rules(source: &str) -> Vec<Result<RuleDefinition>> {
    let lines = lines(source);
    let mut results = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        if is_rule_header(line.text) {
            let end = lines[i + 1..]
                .iter()
                .position(|l| is_rule_header(l.text))
                .map_or(lines.len(), |offset| i + 1 + offset);
            results.push(parse_chunk(source, &lines[i..end]));
            i = end;
        } else if is_blank(line.text) {
            i += 1;
        } else {
            results.push(Err(line_error(line, "expected 'rule' header")));
            // Skip to the next header.
            i += 1;
            while i < lines.len() && !is_rule_header(lines[i].text) {
                i += 1;
            }
        }
    }
    results
}

/// Parses a source holding exactly one rule.
///
/// # Errors
/// Returns a parse error if the rule is malformed or the source does not
/// hold exactly one rule.
pub fn parse_rule(source: &str) -> Result<RuleDefinition> {
    let mut results = parse_rules(source);
    match results.len() {
        1 => results.remove(0),
        0 => Err(Error::parse("expected 'rule' header", 1, 1, String::new())),
        n => Err(Error::parse(
            format!("expected exactly one rule, found {n}"),
            1,
            1,
            String::new(),
        )),
    }
}

/// Parses one rule: a header line and everything up to the next header.
fn parse_chunk(source: &str, lines: &[Line<'_>]) -> Result<RuleDefinition> {
    let header = &lines[0];
    let name = header.text["rule".len()..].trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(line_error(header, format!("invalid rule name '{name}'")));
    }
    let context = || ErrorContext::new().with_rule(name);

    // Pattern lines run until the first section header or `end`.
    let body = &lines[1..];
    let pattern_len = body
        .iter()
        .position(|l| Section::from_header(l.text).is_some() || l.text.trim() == "end")
        .unwrap_or(body.len());

    let pattern = if pattern_len == 0 {
        Vec::new()
    } else {
        let first = &body[0];
        let last = &body[pattern_len - 1];
        let tree = Parser::with_range(
            source,
            first.start,
            last.start + last.text.len(),
            first.number,
        )
        .parse_pattern()
        .map_err(|e| e.with_context(context()))?;
        transform_pattern(&tree).map_err(|e| e.with_context(context()))?
    };

    let mut rule = RuleDefinition::new(name, pattern);
    let mut current: Option<(Section, Vec<&str>)> = None;
    let mut ended = false;

    for line in &body[pattern_len..] {
        if ended {
            if !is_blank(line.text) {
                return Err(line_error(line, "unexpected text after 'end'").with_context(context()));
            }
            continue;
        }
        if let Some(section) = Section::from_header(line.text) {
            finish_section(&mut rule, current.take());
            if section_slot(&mut rule, section).is_some() {
                return Err(line_error(line, format!("duplicate '{}' section", line.text.trim()))
                    .with_context(context()));
            }
            current = Some((section, Vec::new()));
        } else if line.text.trim() == "end" {
            finish_section(&mut rule, current.take());
            ended = true;
        } else if let Some((_, body)) = &mut current {
            body.push(line.text);
        }
    }
    finish_section(&mut rule, current);

    Ok(rule)
}

fn section_slot(rule: &mut RuleDefinition, section: Section) -> &mut Option<String> {
    match section {
        Section::Match => &mut rule.on_match,
        Section::Update => &mut rule.on_update,
        Section::Unmatch => &mut rule.on_unmatch,
    }
}

fn finish_section(rule: &mut RuleDefinition, section: Option<(Section, Vec<&str>)>) {
    if let Some((section, lines)) = section {
        *section_slot(rule, section) = Some(lines.join("\n"));
    }
}
