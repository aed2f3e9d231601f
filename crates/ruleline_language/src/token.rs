//! Token types for the Ruleline rule language.
//!
//! Tokens are the output of the lexer and input to the parser.

use crate::span::Span;

/// A token from lexical analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The type and value of this token.
    pub kind: TokenKind,
    /// Source location of this token.
    pub span: Span,
}

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Returns true if this token is the identifier `word`.
    #[must_use]
    pub fn is_word(&self, word: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(name) if name == word)
    }
}

/// Token types for the rule language.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Delimiters
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `;`
    Semicolon,
    /// End of a source line.
    Newline,

    // Operators
    /// `=` or `==`
    Eq,
    /// `!=` or `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,

    // Atoms
    /// Variable reference like `<time>`
    Variable(String),
    /// Identifier: a record type, a field, or a keyword
    Ident(String),
    /// Integer literal like `42`
    Int(i64),
    /// Float literal like `3.5`
    Float(f64),
    /// String literal like `"hello"`
    Str(String),

    // Meta
    /// Comment text (including `#`)
    Comment(String),
    /// End of input
    Eof,
    /// Lexer error
    Error(String),
}

impl TokenKind {
    /// Returns true if this token kind should be ignored during parsing.
    #[must_use]
    pub const fn is_trivia(&self) -> bool {
        matches!(self, Self::Comment(_))
    }

    /// Returns a human-readable name for this token kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::Comma => "','",
            Self::Semicolon => "';'",
            Self::Newline => "end of line",
            Self::Eq => "'='",
            Self::NotEq => "'!='",
            Self::Lt => "'<'",
            Self::LtEq => "'<='",
            Self::Gt => "'>'",
            Self::GtEq => "'>='",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::Slash => "'/'",
            Self::Variable(_) => "variable",
            Self::Ident(_) => "identifier",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Comment(_) => "comment",
            Self::Eof => "end of input",
            Self::Error(_) => "error",
        }
    }

    /// Returns the comparison operator text, if this is one.
    #[must_use]
    pub const fn comparison(&self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::NotEq => Some("!="),
            Self::Lt => Some("<"),
            Self::LtEq => Some("<="),
            Self::Gt => Some(">"),
            Self::GtEq => Some(">="),
            _ => None,
        }
    }
}
