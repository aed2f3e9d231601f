//! Lexer for the Ruleline rule language.
//!
//! The lexer converts rule text into a stream of tokens. Line breaks are
//! significant (they separate constraints), so they are emitted as
//! [`TokenKind::Newline`] rather than skipped.

use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer for rule source text.
pub struct Lexer<'src> {
    /// Full source text; spans index into it.
    source: &'src str,
    /// Remaining text of the range being tokenized.
    rest: &'src str,
    /// Current byte offset in source.
    position: usize,
    /// Current line number (1-based).
    line: u32,
    /// Current column number (1-based).
    column: u32,
}

impl<'src> Lexer<'src> {
    /// Creates a new lexer for the given source.
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self::with_range(source, 0, source.len(), 1)
    }

    /// Creates a lexer over `source[start..end]`.
    ///
    /// `start` must be the beginning of line `line`; spans still index into
    /// the full source so errors can quote the original line.
    #[must_use]
    pub fn with_range(source: &'src str, start: usize, end: usize, line: u32) -> Self {
        Self {
            source,
            rest: &source[start..end],
            position: start,
            line,
            column: 1,
        }
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;

        let Some(c) = self.peek_char() else {
            return Token::new(
                TokenKind::Eof,
                Span::new(start, start, start_line, start_column),
            );
        };

        let kind = match c {
            '\n' => {
                self.advance();
                TokenKind::Newline
            }
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Star),
            '/' => self.single(TokenKind::Slash),
            '=' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                }
                TokenKind::Eq
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    TokenKind::Error("expected '=' after '!'".into())
                }
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '<' => self.scan_angle(),
            '#' => self.scan_comment(),
            '"' => self.scan_string(),
            c if c.is_ascii_digit() => self.scan_number(),
            c if is_ident_start(c) => TokenKind::Ident(self.scan_ident_text()),
            c => {
                self.advance();
                TokenKind::Error(format!("unexpected character: {c}"))
            }
        };

        Token::new(
            kind,
            Span::new(start, self.position, start_line, start_column),
        )
    }

    /// Tokenizes all source and returns a vector of tokens.
    ///
    /// Comments are included in the output.
    #[must_use]
    pub fn tokenize_all(source: &str) -> Vec<Token> {
        Lexer::new(source).collect_all()
    }

    /// Consumes the lexer, returning every remaining token including `Eof`.
    #[must_use]
    pub fn collect_all(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        tokens
    }

    /// Peeks at the next character without consuming it.
    fn peek_char(&self) -> Option<char> {
        self.rest.chars().next()
    }

    /// Peeks at the character `n` positions ahead.
    fn peek_char_n(&self, n: usize) -> Option<char> {
        self.rest.chars().nth(n)
    }

    /// Advances past the next character.
    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            let len = c.len_utf8();
            self.rest = &self.rest[len..];
            self.position += len;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    /// Skips whitespace other than line breaks.
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() && c != '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Scans a comment starting with `#`.
    fn scan_comment(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.advance();
        }
        TokenKind::Comment(text)
    }

    /// Scans `<`, `<=`, `<>`, or a variable reference `<name>`.
    fn scan_angle(&mut self) -> TokenKind {
        // A variable is `<` immediately followed by an identifier and `>`.
        if self.peek_char_n(1).is_some_and(is_ident_start) {
            let len = self.rest[1..]
                .find(|c: char| !is_ident_char(c))
                .unwrap_or(self.rest.len() - 1);
            if self.rest[1 + len..].starts_with('>') {
                self.advance();
                let name = self.scan_ident_text();
                self.advance();
                return TokenKind::Variable(name);
            }
        }

        self.advance();
        match self.peek_char() {
            Some('=') => {
                self.advance();
                TokenKind::LtEq
            }
            Some('>') => {
                self.advance();
                TokenKind::NotEq
            }
            _ => TokenKind::Lt,
        }
    }

    /// Scans a string literal.
    fn scan_string(&mut self) -> TokenKind {
        self.advance(); // consume opening '"'
        let mut text = String::new();
        loop {
            match self.peek_char() {
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some(c) => {
                            return TokenKind::Error(format!("invalid escape sequence: \\{c}"));
                        }
                        None => {
                            return TokenKind::Error(
                                "unexpected end of input in string escape".into(),
                            );
                        }
                    };
                    self.advance();
                    text.push(escaped);
                }
                Some('\n') | None => {
                    return TokenKind::Error("unterminated string literal".into());
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
            }
        }
        TokenKind::Str(text)
    }

    /// Scans a number (integer or float, with optional exponent).
    fn scan_number(&mut self) -> TokenKind {
        let start = self.position;
        let mut is_float = false;

        self.skip_digits();
        if self.peek_char() == Some('.') && self.peek_char_n(1).is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            self.skip_digits();
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let signed = matches!(self.peek_char_n(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_char_n(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
                if signed {
                    self.advance();
                }
                self.skip_digits();
            }
        }

        let text = &self.source[start..self.position];
        if is_float {
            match text.parse::<f64>() {
                Ok(n) => TokenKind::Float(n),
                Err(e) => TokenKind::Error(format!("invalid float: {e}")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::Int(n),
                Err(e) => TokenKind::Error(format!("invalid integer: {e}")),
            }
        }
    }

    fn skip_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    /// Scans identifier text.
    fn scan_ident_text(&mut self) -> String {
        let start = self.position;
        while self.peek_char().is_some_and(is_ident_char) {
            self.advance();
        }
        self.source[start..self.position].to_string()
    }
}

/// Returns true if `c` can start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

/// Returns true if `c` can appear in an identifier (not at start).
fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
