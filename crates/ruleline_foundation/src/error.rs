//! Error types for the Ruleline system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//! The kinds fall into four families: parse errors (one rule's text is
//! malformed), compile errors (a pattern cannot be turned into SQL),
//! execution errors (a callback failed), and store errors (database
//! failures, including uniqueness conflicts).

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Ruleline operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a parse error at a source position.
    #[must_use]
    pub fn parse(message: impl Into<String>, line: u32, column: u32, context: String) -> Self {
        Self::new(ErrorKind::ParseError {
            message: message.into(),
            line,
            column,
            context,
        })
    }

    /// Creates an unbound variable error.
    #[must_use]
    pub fn unbound_variable(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnboundVariable(name.into()))
    }

    /// Creates a cyclic binding error.
    #[must_use]
    pub fn cyclic_binding(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::CyclicBinding(name.into()))
    }

    /// Creates an unknown record type error.
    #[must_use]
    pub fn unknown_record_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRecordType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            record_type: record_type.into(),
            field: field.into(),
        })
    }

    /// Creates an invalid constraint error.
    #[must_use]
    pub fn invalid_constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConstraint(message.into()))
    }

    /// Creates a callback execution error.
    #[must_use]
    pub fn execution(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution {
            rule: rule.into(),
            message: message.into(),
        })
    }

    /// Creates a database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database(message.into()))
    }

    /// Creates an internal consistency error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }

    /// Returns true if this error was raised while compiling a pattern.
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UnboundVariable(_)
                | ErrorKind::CyclicBinding(_)
                | ErrorKind::UnknownDialect(_)
                | ErrorKind::NoPositiveTable
                | ErrorKind::UnknownRecordType(_)
                | ErrorKind::UnknownField { .. }
                | ErrorKind::InvalidConstraint(_)
        )
    }

    /// Returns true if this error is a uniqueness conflict in the store.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self.kind, ErrorKind::ConcurrencyConflict(_))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Parse error in rule text.
    #[error("parse error at {line}:{column}: {message}")]
    ParseError {
        /// Description of the deepest failing alternative.
        message: String,
        /// Line number (1-indexed).
        line: u32,
        /// Column number (1-indexed).
        column: u32,
        /// The source line where the error occurred.
        context: String,
    },

    /// A variable is referenced but never bound by an `=` comparison.
    #[error("unbound variable: <{0}>")]
    UnboundVariable(String),

    /// A variable's bindings refer back to itself.
    #[error("cyclic binding for variable <{0}>")]
    CyclicBinding(String),

    /// The configured SQL dialect is not supported.
    #[error("unknown SQL dialect: {0}")]
    UnknownDialect(String),

    /// The pattern has no positive record matcher at its top level.
    #[error("pattern has no positive record matcher")]
    NoPositiveTable,

    /// A record matcher names a type the schema registry does not know.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// A record matcher references a field its type does not declare.
    #[error("unknown field {field} on record type {record_type}")]
    UnknownField {
        /// The record type that was matched.
        record_type: String,
        /// The field that was not found.
        field: String,
    },

    /// A constraint is used in a position where it has no meaning.
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),

    /// A callback body failed while executing.
    #[error("callback failed in rule {rule}: {message}")]
    Execution {
        /// Name of the rule whose callback failed.
        rule: String,
        /// Failure message reported by the callback.
        message: String,
    },

    /// A uniqueness constraint rejected a write.
    #[error("concurrent write conflict: {0}")]
    ConcurrencyConflict(String),

    /// Any other failure reported by the database.
    #[error("database error: {0}")]
    Database(String),

    /// A rule with the same identifier is already registered.
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule name the error belongs to.
    pub rule: Option<String>,
    /// Line number in source.
    pub line: Option<u32>,
    /// Column number in source.
    pub column: Option<u32>,
    /// Additional notes, innermost first.
    pub notes: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rule name.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Sets the line and column.
    #[must_use]
    pub fn with_position(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Adds a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rule) = &self.rule {
            write!(f, "in rule {rule}")?;
            if let (Some(line), Some(col)) = (self.line, self.column) {
                write!(f, " at {line}:{col}")?;
            }
        }
        for note in &self.notes {
            write!(f, "\n  {note}")?;
        }
        Ok(())
    }
}
