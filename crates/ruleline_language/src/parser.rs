//! Parser for rule patterns.
//!
//! The parser converts a token stream into an untyped [`SyntaxNode`] tree.
//! It is a recursive-descent parser over a pre-lexed token vector, so it can
//! look ahead freely. Every time a token fails to match what a production
//! wanted, the failure is noted; when parsing fails, the reported error is
//! the one recorded at the furthest token, listing every alternative that
//! was tried there.

use std::collections::BTreeSet;

use ruleline_foundation::{Error, Result};

use crate::ast::{AggregateKind, JsonType, RESERVED_WORDS};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::syntax::{SyntaxKind, SyntaxNode};
use crate::token::{Token, TokenKind};

/// Marker for a failed production; the details live in [`Parser::deepest`].
#[derive(Debug)]
struct Failed;

type PResult<T> = std::result::Result<T, Failed>;

/// The furthest point the parser failed at.
#[derive(Debug)]
struct Failure {
    index: usize,
    expected: BTreeSet<&'static str>,
    message: Option<String>,
}

/// Parser for rule pattern text.
pub struct Parser<'src> {
    /// Source text (for error messages).
    source: &'src str,
    /// Tokens with trivia removed; always ends with `Eof`.
    tokens: Vec<Token>,
    /// Index of the current token.
    pos: usize,
    /// Deepest failure seen so far.
    deepest: Option<Failure>,
}

impl<'src> Parser<'src> {
    /// Creates a new parser for the given source.
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self::from_lexer(source, Lexer::new(source))
    }

    /// Creates a parser over `source[start..end]`, which begins on `line`.
    #[must_use]
    pub fn with_range(source: &'src str, start: usize, end: usize, line: u32) -> Self {
        Self::from_lexer(source, Lexer::with_range(source, start, end, line))
    }

    fn from_lexer(source: &'src str, lexer: Lexer<'src>) -> Self {
        let tokens = lexer
            .collect_all()
            .into_iter()
            .filter(|t| !t.kind.is_trivia())
            .collect();
        Self {
            source,
            tokens,
            pos: 0,
            deepest: None,
        }
    }

    /// Parses a sequence of constraints up to the end of input.
    ///
    /// # Errors
    /// Returns a parse error describing the deepest failing alternative.
    pub fn parse_pattern(&mut self) -> Result<SyntaxNode> {
        let start = self.current().span;
        match self.constraints(false) {
            Ok(children) => {
                let span = start.to(self.previous_span());
                Ok(SyntaxNode::branch(SyntaxKind::Pattern, None, children, span))
            }
            Err(Failed) => Err(self.failure_error()),
        }
    }

    // -------------------------------------------------------------------------
    // Constraints
    // -------------------------------------------------------------------------

    /// Parses constraints separated by line breaks or `;`.
    fn constraints(&mut self, in_block: bool) -> PResult<Vec<SyntaxNode>> {
        let mut out = Vec::new();
        loop {
            self.skip_separators();
            if self.at_terminator(in_block) {
                break;
            }
            out.push(self.constraint()?);
            match self.current().kind {
                TokenKind::Newline | TokenKind::Semicolon => {}
                _ if self.at_terminator(in_block) => break,
                _ => {
                    self.expected("end of line");
                    self.expected("';'");
                    if in_block {
                        self.expected("'}'");
                    }
                    return Err(Failed);
                }
            }
        }
        Ok(out)
    }

    fn constraint(&mut self) -> PResult<SyntaxNode> {
        let start = self.current().span;
        if self.current().is_word("not") {
            self.advance();
            let children = if self.peek_past_newlines(&TokenKind::LBrace) {
                self.block()?
            } else if self.at_record_match() {
                vec![self.record_match()?]
            } else {
                self.expected("'{'");
                self.expected("record matcher");
                return Err(Failed);
            };
            return Ok(SyntaxNode::branch(
                SyntaxKind::Negation,
                None,
                children,
                start.to(self.previous_span()),
            ));
        }
        if self.current().is_word("any") {
            self.advance();
            if !self.peek_past_newlines(&TokenKind::LBrace) {
                self.expected("'{'");
                return Err(Failed);
            }
            let children = self.block()?;
            return Ok(SyntaxNode::branch(
                SyntaxKind::Any,
                None,
                children,
                start.to(self.previous_span()),
            ));
        }
        if self.at_record_match() {
            return self.record_match();
        }
        self.expression()
    }

    /// Parses `{ constraint; ... }`, returning the inner constraints.
    fn block(&mut self) -> PResult<Vec<SyntaxNode>> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace)?;
        let children = self.constraints(true)?;
        self.expect(&TokenKind::RBrace)?;
        Ok(children)
    }

    fn at_record_match(&self) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name)
            if name.starts_with(|c: char| c.is_uppercase()))
            && self.peek(1).kind == TokenKind::LParen
    }

    fn record_match(&mut self) -> PResult<SyntaxNode> {
        let start = self.current().span;
        let TokenKind::Ident(name) = self.current().kind.clone() else {
            self.expected("record type");
            return Err(Failed);
        };
        self.advance();
        self.expect(&TokenKind::LParen)?;

        let mut clauses = Vec::new();
        self.skip_newlines();
        if self.current().kind != TokenKind::RParen {
            loop {
                self.skip_newlines();
                clauses.push(self.clause()?);
                self.skip_newlines();
                match self.current().kind {
                    TokenKind::Comma => self.advance(),
                    TokenKind::RParen => break,
                    _ => {
                        self.expected("','");
                        self.expected("')'");
                        return Err(Failed);
                    }
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        Ok(SyntaxNode::branch(
            SyntaxKind::RecordMatch,
            Some(name),
            clauses,
            start.to(self.previous_span()),
        ))
    }

    fn clause(&mut self) -> PResult<SyntaxNode> {
        if let TokenKind::Variable(name) = &self.current().kind {
            if matches!(
                self.peek(1).kind,
                TokenKind::Comma | TokenKind::RParen | TokenKind::Newline
            ) {
                let span = self.current().span;
                let node = SyntaxNode::leaf(SyntaxKind::BareBinding, name.clone(), span);
                self.advance();
                return Ok(node);
            }
        }
        self.expression()
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    fn expression(&mut self) -> PResult<SyntaxNode> {
        let lhs = self.additive()?;
        let Some(op) = self.current().kind.comparison() else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.additive()?;
        let span = lhs.span.to(rhs.span);
        Ok(SyntaxNode::branch(
            SyntaxKind::Comparison,
            Some(op.to_string()),
            vec![lhs, rhs],
            span,
        ))
    }

    fn additive(&mut self) -> PResult<SyntaxNode> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Self::arithmetic(lhs, op, rhs);
        }
    }

    fn term(&mut self) -> PResult<SyntaxNode> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => "*",
                TokenKind::Slash => "/",
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Self::arithmetic(lhs, op, rhs);
        }
    }

    fn arithmetic(lhs: SyntaxNode, op: &str, rhs: SyntaxNode) -> SyntaxNode {
        let span = lhs.span.to(rhs.span);
        SyntaxNode::branch(
            SyntaxKind::Arithmetic,
            Some(op.to_string()),
            vec![lhs, rhs],
            span,
        )
    }

    fn unary(&mut self) -> PResult<SyntaxNode> {
        if self.current().kind != TokenKind::Minus {
            return self.postfix();
        }
        let start = self.current().span;
        self.advance();
        let span = start.to(self.current().span);
        let node = match self.current().kind {
            TokenKind::Int(n) => SyntaxNode::leaf(SyntaxKind::Int, format!("-{n}"), span),
            TokenKind::Float(x) => SyntaxNode::leaf(SyntaxKind::Float, format!("{:?}", -x), span),
            _ => {
                self.expected("number");
                return Err(Failed);
            }
        };
        self.advance();
        Ok(node)
    }

    fn postfix(&mut self) -> PResult<SyntaxNode> {
        let base = self.primary()?;
        let start = base.span;
        let mut children = vec![base];

        while self.current().kind == TokenKind::LBracket {
            self.advance();
            let token = self.current().clone();
            let segment = match token.kind {
                TokenKind::Str(key) => SyntaxNode::leaf(SyntaxKind::PathKey, key, token.span),
                TokenKind::Int(index) => {
                    SyntaxNode::leaf(SyntaxKind::PathIndex, index.to_string(), token.span)
                }
                _ => {
                    self.expected("string");
                    self.expected("integer");
                    return Err(Failed);
                }
            };
            self.advance();
            self.expect(&TokenKind::RBracket)?;
            children.push(segment);
        }

        let mut cast = None;
        if self.current().is_word("as") {
            self.advance();
            match &self.current().kind {
                TokenKind::Ident(word) if JsonType::from_text(word).is_some() => {
                    cast = Some(word.clone());
                    self.advance();
                }
                _ => {
                    self.expected("json type");
                    return Err(Failed);
                }
            }
        }

        if children.len() == 1 && cast.is_none() {
            return Ok(children.remove(0));
        }
        Ok(SyntaxNode::branch(
            SyntaxKind::JsonAccess,
            cast,
            children,
            start.to(self.previous_span()),
        ))
    }

    fn primary(&mut self) -> PResult<SyntaxNode> {
        let token = self.current().clone();
        let span = token.span;
        let node = match token.kind {
            TokenKind::Variable(name) => SyntaxNode::leaf(SyntaxKind::Variable, name, span),
            TokenKind::Str(s) => SyntaxNode::leaf(SyntaxKind::Str, s, span),
            TokenKind::Int(n) => SyntaxNode::leaf(SyntaxKind::Int, n.to_string(), span),
            TokenKind::Float(x) => SyntaxNode::leaf(SyntaxKind::Float, format!("{x:?}"), span),
            TokenKind::LParen => return self.tuple(),
            TokenKind::Ident(word) => match word.as_str() {
                "true" | "false" => SyntaxNode::leaf(SyntaxKind::Bool, word.clone(), span),
                "nil" => SyntaxNode {
                    kind: SyntaxKind::Nil,
                    text: None,
                    children: Vec::new(),
                    span,
                },
                w if AggregateKind::from_text(w).is_some() => return self.aggregate(),
                w if RESERVED_WORDS.contains(&w) => {
                    self.expected("expression");
                    return Err(Failed);
                }
                _ if self.at_record_match() => {
                    self.fail_with("record matchers are only allowed as constraints");
                    return Err(Failed);
                }
                _ => SyntaxNode::leaf(SyntaxKind::Field, word.clone(), span),
            },
            TokenKind::Error(message) => {
                self.fail_with(&message);
                return Err(Failed);
            }
            _ => {
                self.expected("expression");
                return Err(Failed);
            }
        };
        self.advance();
        Ok(node)
    }

    /// Parses `( ... )` as a grouping or a tuple.
    fn tuple(&mut self) -> PResult<SyntaxNode> {
        let start = self.current().span;
        self.expect(&TokenKind::LParen)?;
        self.skip_newlines();

        let mut elements = Vec::new();
        let mut saw_comma = false;
        while self.current().kind != TokenKind::RParen {
            elements.push(self.expression()?);
            self.skip_newlines();
            match self.current().kind {
                TokenKind::Comma => {
                    saw_comma = true;
                    self.advance();
                    self.skip_newlines();
                }
                TokenKind::RParen => break,
                _ => {
                    self.expected("','");
                    self.expected("')'");
                    return Err(Failed);
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        if elements.len() == 1 && !saw_comma {
            return Ok(elements.remove(0));
        }
        Ok(SyntaxNode::branch(
            SyntaxKind::Tuple,
            None,
            elements,
            start.to(self.previous_span()),
        ))
    }

    fn aggregate(&mut self) -> PResult<SyntaxNode> {
        let start = self.current().span;
        let TokenKind::Ident(word) = self.current().kind.clone() else {
            self.expected("aggregate");
            return Err(Failed);
        };
        self.advance();

        let mut children = Vec::new();
        if self.current().kind == TokenKind::LParen {
            self.advance();
            self.skip_newlines();
            children.push(self.expression()?);
            self.skip_newlines();
            self.expect(&TokenKind::RParen)?;
        }
        if !self.peek_past_newlines(&TokenKind::LBrace) {
            self.expected("'{'");
            return Err(Failed);
        }
        let block_start = self.current().span;
        let inner = self.block()?;
        children.push(SyntaxNode::branch(
            SyntaxKind::Block,
            None,
            inner,
            block_start.to(self.previous_span()),
        ));

        Ok(SyntaxNode::branch(
            SyntaxKind::Aggregate,
            Some(word),
            children,
            start.to(self.previous_span()),
        ))
    }

    // -------------------------------------------------------------------------
    // Token helpers
    // -------------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.current().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn at_terminator(&self, in_block: bool) -> bool {
        match self.current().kind {
            TokenKind::Eof => true,
            TokenKind::RBrace => in_block,
            _ => false,
        }
    }

    fn skip_newlines(&mut self) {
        while self.current().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(
            self.current().kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.advance();
        }
    }

    /// Returns true if `kind` follows, skipping line breaks.
    ///
    /// Consumes the line breaks only when it does.
    fn peek_past_newlines(&mut self, kind: &TokenKind) -> bool {
        let mut n = 0;
        while self.peek(n).kind == TokenKind::Newline {
            n += 1;
        }
        if &self.peek(n).kind == kind {
            self.skip_newlines();
            true
        } else {
            false
        }
    }

    /// Expects the current token to be of a specific kind, then advances.
    fn expect(&mut self, expected: &TokenKind) -> PResult<()> {
        if std::mem::discriminant(&self.current().kind) == std::mem::discriminant(expected) {
            self.advance();
            Ok(())
        } else {
            self.expected(expected.name());
            Err(Failed)
        }
    }

    // -------------------------------------------------------------------------
    // Failure tracking
    // -------------------------------------------------------------------------

    /// Records that `what` would have been accepted at the current token.
    fn expected(&mut self, what: &'static str) {
        let index = self.pos;
        match &mut self.deepest {
            Some(failure) if failure.index == index => {
                failure.expected.insert(what);
            }
            Some(failure) if failure.index > index => {}
            _ => {
                self.deepest = Some(Failure {
                    index,
                    expected: BTreeSet::from([what]),
                    message: None,
                });
            }
        }
    }

    /// Records a failure with a custom message at the current token.
    fn fail_with(&mut self, message: &str) {
        let index = self.pos;
        if self.deepest.as_ref().is_none_or(|f| f.index <= index) {
            self.deepest = Some(Failure {
                index,
                expected: BTreeSet::new(),
                message: Some(message.to_string()),
            });
        }
    }

    fn failure_error(&self) -> Error {
        let (index, message) = match &self.deepest {
            Some(failure) => {
                let found = self.tokens[failure.index].kind.name();
                let message = failure.message.clone().unwrap_or_else(|| {
                    let expected: Vec<&str> = failure.expected.iter().copied().collect();
                    if expected.len() == 1 {
                        format!("expected {}, found {found}", expected[0])
                    } else {
                        format!("expected one of {}, found {found}", expected.join(", "))
                    }
                });
                (failure.index, message)
            }
            None => (self.pos, "invalid syntax".to_string()),
        };
        let span = self.tokens[index].span;
        let text = span.line_text(self.source).to_string();
        Error::parse(message, span.line, span.column, text)
    }
}

/// Parses pattern text into an untyped syntax tree.
///
/// # Errors
/// Returns a parse error if the text is not a valid pattern.
pub fn parse_syntax(source: &str) -> Result<SyntaxNode> {
    Parser::new(source).parse_pattern()
}
