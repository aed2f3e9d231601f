//! Lexer, parser, typed AST, and unparser for the Ruleline rule language.
//!
//! This crate provides:
//! - [`Lexer`] - Tokenization of rule text
//! - [`Parser`] - Parsing tokens into an untyped [`SyntaxNode`] tree
//! - [`transform`] - Mapping the parse tree onto the typed [`Node`] AST
//! - [`unparse`] - Printing the AST back to rule text
//! - [`RuleDefinition`] - A named pattern with its callback sources

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod rule;
pub mod span;
pub mod syntax;
pub mod token;
pub mod transform;
pub mod unparse;


pub use ast::{AggregateKind, ArithOp, CompareOp, JsonType, Node, PathSegment};
pub use lexer::Lexer;
pub use parser::{Parser, parse_syntax};
pub use rule::{RuleDefinition, parse_rule, parse_rules};
pub use span::Span;
pub use syntax::{SyntaxKind, SyntaxNode};
pub use token::{Token, TokenKind};
pub use unparse::{unparse_constraints, unparse_node, unparse_rule};

use ruleline_foundation::Result;

/// Parses a stand-alone constraint fragment.
///
/// # Errors
/// Returns a parse error if the text is not a valid pattern.
pub fn parse_constraints(source: &str) -> Result<Vec<Node>> {
    let tree = parse_syntax(source)?;
    transform::transform_pattern(&tree)
}
