//! Recursive-descent parser for search queries.
//!
//! ```text
//! or      := and ("OR" and)*
//! and     := unary (["AND"] unary)*      adjacency means AND
//! unary   := "NOT" unary | primary
//! primary := "(" or ")" | term
//! ```

use super::glob::{GlobPattern, has_wildcards};
use super::lexer::{Lexer, RawTerm, Token, TokenKind};
use super::{QueryError, QueryErrorKind, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Base name of anything.
    Name,
    /// Base name of files and links only.
    FileName,
    /// Path of the containing folder.
    Folder,
    /// Full path.
    Path,
    Hidden,
    ReadOnly,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "name" => Some(Self::Name),
            "filename" => Some(Self::FileName),
            "folder" => Some(Self::Folder),
            "path" => Some(Self::Path),
            "hidden" => Some(Self::Hidden),
            "readonly" => Some(Self::ReadOnly),
            _ => None,
        }
    }

    fn is_boolean(&self) -> bool {
        matches!(self, Self::Hidden | Self::ReadOnly)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatcher {
    /// Case-insensitive substring. Stored lowercased.
    Contains(String),
    /// Case-insensitive equality. Stored lowercased.
    Equals(String),
    Glob(GlobPattern),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: Field,
    pub matcher: ValueMatcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Predicate(Predicate),
}

pub fn parse(input: &str) -> Result<Expr, QueryError> {
    let tokens = Lexer::new(input).tokenize()?;
    if tokens.is_empty() {
        return Err(QueryError::new(
            QueryErrorKind::EmptyQuery,
            "Type something to search for",
            Span::new(0, input.len()),
        ));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        let message = if token.kind == TokenKind::RParen {
            "Unmatched ')'"
        } else {
            "Unexpected token"
        };
        return Err(QueryError::new(QueryErrorKind::UnexpectedToken, message, token.span));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn end_span(&self) -> Span {
        Span::new(self.input_len, self.input_len)
    }

    fn parse_or(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and()?;
        while self.peek().is_some_and(|t| t.kind == TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::And) => {
                    self.advance();
                }
                Some(TokenKind::Term(_) | TokenKind::LParen | TokenKind::Not) => {}
                _ => return Ok(left),
            }
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, QueryError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, QueryError> {
        let Some(token) = self.advance() else {
            return Err(QueryError::new(
                QueryErrorKind::UnexpectedEnd,
                "Query ends where a search term was expected",
                self.end_span(),
            ));
        };
        match token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen, ..
                    }) => Ok(inner),
                    _ => Err(QueryError::new(
                        QueryErrorKind::UnbalancedParen,
                        "Missing ')'",
                        token.span,
                    )),
                }
            }
            TokenKind::Term(term) => Ok(Expr::Predicate(predicate(term, token.span)?)),
            TokenKind::RParen => Err(QueryError::new(
                QueryErrorKind::UnexpectedToken,
                "Unmatched ')'",
                token.span,
            )),
            TokenKind::And | TokenKind::Or | TokenKind::Not => Err(QueryError::new(
                QueryErrorKind::UnexpectedToken,
                "Expected a search term before this operator",
                token.span,
            )),
        }
    }
}

fn predicate(term: RawTerm, span: Span) -> Result<Predicate, QueryError> {
    let field = match term.field.as_deref() {
        None => Field::Name,
        Some(name) => Field::parse(name).ok_or_else(|| {
            QueryError::new(QueryErrorKind::UnknownField, format!("Unknown field '{name}'"), span)
        })?,
    };

    let matcher = if field.is_boolean() {
        ValueMatcher::Bool(parse_bool(&term.value).ok_or_else(|| {
            QueryError::new(
                QueryErrorKind::InvalidBoolean,
                format!("'{}' only takes true or false", term.field.as_deref().unwrap_or_default()),
                span,
            )
        })?)
    } else if !term.quoted && has_wildcards(&term.value) {
        ValueMatcher::Glob(GlobPattern::new(&term.value))
    } else if term.exact {
        ValueMatcher::Equals(term.value.to_lowercase())
    } else {
        ValueMatcher::Contains(term.value.to_lowercase())
    };
    Ok(Predicate { field, matcher })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
