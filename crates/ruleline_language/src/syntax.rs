//! Untyped parse tree produced by the parser.
//!
//! Every node records which grammar production matched, the text that
//! distinguishes it (an operator, a name, a literal), its children, and its
//! source span. The [`transform`](crate::transform) stage turns this tree
//! into the typed [`Node`](crate::ast::Node) AST.

use crate::span::Span;

/// The grammar production a [`SyntaxNode`] was parsed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyntaxKind {
    /// `Type(clause, ...)`; text is the type name.
    RecordMatch,
    /// `<name>` as a record matcher clause; text is the name.
    BareBinding,
    /// `not { ... }`; children are constraints.
    Negation,
    /// `any { ... }`; children are constraints.
    Any,
    /// `lhs op rhs` with a comparison operator; text is the operator.
    Comparison,
    /// `lhs op rhs` with an arithmetic operator; text is the operator.
    Arithmetic,
    /// `<name>`; text is the name.
    Variable,
    /// A bare identifier naming a record field; text is the name.
    Field,
    /// String literal; text is the unescaped content.
    Str,
    /// Integer literal; text is the decimal digits.
    Int,
    /// Float literal; text is the literal as written.
    Float,
    /// `true` or `false`; text is the word.
    Bool,
    /// `nil`.
    Nil,
    /// `expr[...]...`; first child is the base, the rest are path segments,
    /// text is the optional `as` type.
    JsonAccess,
    /// A string path segment; text is the key.
    PathKey,
    /// An integer path segment; text is the index.
    PathIndex,
    /// `(a, b, ...)`; children are the elements.
    Tuple,
    /// `count(...) { ... }` and friends; text is the aggregate word,
    /// children are an optional projection followed by a `Block`.
    Aggregate,
    /// `{ ... }`; children are constraints.
    Block,
    /// A sequence of top-level constraints.
    Pattern,
}

/// A node of the untyped parse tree.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntaxNode {
    /// Which production matched.
    pub kind: SyntaxKind,
    /// Distinguishing text, if the production has any.
    pub text: Option<String>,
    /// Child nodes in source order.
    pub children: Vec<SyntaxNode>,
    /// Source location.
    pub span: Span,
}

impl SyntaxNode {
    /// Creates a leaf node with text.
    #[must_use]
    pub fn leaf(kind: SyntaxKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: Some(text.into()),
            children: Vec::new(),
            span,
        }
    }

    /// Creates an interior node.
    #[must_use]
    pub fn branch(
        kind: SyntaxKind,
        text: Option<String>,
        children: Vec<SyntaxNode>,
        span: Span,
    ) -> Self {
        Self {
            kind,
            text,
            children,
            span,
        }
    }

    /// Returns the node text, or an empty string.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}
