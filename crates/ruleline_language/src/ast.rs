//! Typed constraint AST.
//!
//! A rule's pattern is an ordered list of [`Node`]s. Nodes carry no source
//! spans so that two patterns that differ only in layout compare equal.

use std::fmt;

use ruleline_foundation::Value;

/// A constraint or expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// `Type(clause, ...)`: join one record of `record_type`.
    RecordMatch {
        /// Record type name.
        record_type: String,
        /// Clauses evaluated against that record.
        clauses: Vec<Node>,
    },
    /// `lhs op rhs` with a comparison operator.
    Comparison {
        /// Left operand.
        lhs: Box<Node>,
        /// Operator.
        op: CompareOp,
        /// Right operand.
        rhs: Box<Node>,
    },
    /// `lhs op rhs` with an arithmetic operator.
    BinaryOp {
        /// Left operand.
        lhs: Box<Node>,
        /// Operator.
        op: ArithOp,
        /// Right operand.
        rhs: Box<Node>,
    },
    /// `<name>`
    Variable(String),
    /// A literal.
    Constant(Value),
    /// A field of the enclosing record matcher.
    RecordField(String),
    /// `expr["key"][0] as type`
    JsonLookup {
        /// The JSON-valued expression.
        expr: Box<Node>,
        /// Keys and indices to follow.
        path: Vec<PathSegment>,
        /// Type the looked-up value is read as.
        ty: JsonType,
    },
    /// `(a, b, ...)`
    Tuple(Vec<Node>),
    /// `count(expr) { ... }` and friends.
    Aggregate {
        /// Aggregate function.
        kind: AggregateKind,
        /// Optional projected expression.
        expr: Option<Box<Node>>,
        /// Inner constraints; bindings made here are not visible outside.
        constraints: Vec<Node>,
    },
    /// `any { ... }`: at least one inner binding exists.
    Any(Vec<Node>),
    /// `not { ... }`: no inner binding exists.
    Negation(Vec<Node>),
}

impl Node {
    /// Creates a comparison node.
    #[must_use]
    pub fn compare(lhs: Node, op: CompareOp, rhs: Node) -> Self {
        Self::Comparison {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    /// Creates an arithmetic node.
    #[must_use]
    pub fn binary(lhs: Node, op: ArithOp, rhs: Node) -> Self {
        Self::BinaryOp {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    /// Creates a variable reference.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Creates a record field reference.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Self {
        Self::RecordField(name.into())
    }

    /// Creates the clause `<name>`, which binds the same-named field.
    #[must_use]
    pub fn bare_binding(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::compare(
            Self::Variable(name.clone()),
            CompareOp::Eq,
            Self::RecordField(name),
        )
    }

    /// Returns the variable name if this node is `<x> = x`.
    #[must_use]
    pub fn as_bare_binding(&self) -> Option<&str> {
        match self {
            Self::Comparison {
                lhs,
                op: CompareOp::Eq,
                rhs,
            } => match (lhs.as_ref(), rhs.as_ref()) {
                (Self::Variable(v), Self::RecordField(f)) if v == f => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns true if this node introduces an inner scope.
    #[must_use]
    pub const fn is_scope(&self) -> bool {
        matches!(
            self,
            Self::Aggregate { .. } | Self::Any(_) | Self::Negation(_)
        )
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Parses operator text.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::LtEq,
            ">" => Self::Gt,
            ">=" => Self::GtEq,
            _ => return None,
        })
    }

    /// Returns the rule-language spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl ArithOp {
    /// Parses operator text.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            _ => return None,
        })
    }

    /// Returns the operator spelling (shared by the rule language and SQL).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    /// Binding strength; higher binds tighter.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a JSON path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(i64),
}

/// The type a JSON lookup reads its value as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum JsonType {
    /// The raw JSON value.
    #[default]
    Json,
    /// Integer.
    Integer,
    /// Float.
    Float,
    /// Text.
    Text,
    /// Boolean.
    Boolean,
}

impl JsonType {
    /// Parses the word after `as`.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "json" => Self::Json,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "text" => Self::Text,
            "boolean" => Self::Boolean,
            _ => return None,
        })
    }

    /// Returns the rule-language spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    /// `count`
    Count,
    /// `sum`
    Sum,
    /// `minimum`
    Min,
    /// `maximum`
    Max,
    /// `array`
    ArrayCollect,
}

impl AggregateKind {
    /// Parses the aggregate word.
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "minimum" => Self::Min,
            "maximum" => Self::Max,
            "array" => Self::ArrayCollect,
            _ => return None,
        })
    }

    /// Returns the rule-language spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
            Self::ArrayCollect => "array",
        }
    }
}

/// Words that cannot be used as field names.
pub const RESERVED_WORDS: &[&str] = &[
    "not", "any", "count", "sum", "minimum", "maximum", "array", "true", "false", "nil", "as",
];
