//! Tokenizer for search queries.
//!
//! Handles:
//! - Parentheses for grouping
//! - `AND`, `OR`, `NOT` keywords (any case, only when unquoted and standing alone)
//! - `field:value` and `field:=value` terms
//! - Double-quoted phrases, bare or as a field value, with `\"` and `\\` escapes

use super::{QueryError, QueryErrorKind, Span};

// ============================================================================
// Token types
// ============================================================================

/// One search term before its field is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTerm {
    pub field: Option<String>,
    /// `field:=value`
    pub exact: bool,
    pub value: String,
    /// The value was written in double quotes, so wildcards are literal.
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Term(RawTerm),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

// ============================================================================
// Lexer
// ============================================================================

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, QueryError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.at_end() {
                return Ok(tokens);
            }
            tokens.push(self.next_token()?);
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.pos..].chars().next().unwrap_or('\0')
    }

    fn skip_whitespace(&mut self) {
        while !self.at_end() {
            let c = self.current_char();
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn next_token(&mut self) -> Result<Token, QueryError> {
        let start = self.pos;
        let kind = match self.current_char() {
            '(' => {
                self.pos += 1;
                TokenKind::LParen
            }
            ')' => {
                self.pos += 1;
                TokenKind::RParen
            }
            '"' => {
                let value = self.read_quoted()?;
                TokenKind::Term(RawTerm {
                    field: None,
                    exact: false,
                    value,
                    quoted: true,
                })
            }
            _ => self.read_word_or_term(start)?,
        };
        Ok(Token {
            kind,
            span: Span::new(start, self.pos),
        })
    }

    fn is_word_end(c: char) -> bool {
        c.is_whitespace() || c == '(' || c == ')'
    }

    fn read_bare(&mut self) -> &'a str {
        let start = self.pos;
        while !self.at_end() {
            let c = self.current_char();
            if Self::is_word_end(c) || c == '"' {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn read_word_or_term(&mut self, start: usize) -> Result<TokenKind, QueryError> {
        // A field name is letters only, directly followed by ':'
        let field_len = self.input[start..]
            .char_indices()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map(|(i, _)| i)
            .unwrap_or(self.input.len() - start);
        let has_field = field_len > 0 && self.input[start + field_len..].starts_with(':');

        if !has_field {
            let word = self.read_bare();
            if word.is_empty() {
                return Err(QueryError::new(
                    QueryErrorKind::UnexpectedToken,
                    "Unexpected character",
                    Span::new(start, start + 1),
                ));
            }
            return Ok(match word.to_ascii_uppercase().as_str() {
                "AND" => TokenKind::And,
                "OR" => TokenKind::Or,
                "NOT" => TokenKind::Not,
                _ => TokenKind::Term(RawTerm {
                    field: None,
                    exact: false,
                    value: word.to_string(),
                    quoted: false,
                }),
            });
        }

        let field = self.input[start..start + field_len].to_ascii_lowercase();
        self.pos = start + field_len + 1;
        let exact = self.current_char() == '=';
        if exact {
            self.pos += 1;
        }
        let (value, quoted) = if self.current_char() == '"' {
            (self.read_quoted()?, true)
        } else {
            (self.read_bare().to_string(), false)
        };
        if value.is_empty() && !quoted {
            return Err(QueryError::new(
                QueryErrorKind::MissingValue,
                format!("'{field}:' needs a value"),
                Span::new(start, self.pos),
            ));
        }
        Ok(TokenKind::Term(RawTerm {
            field: Some(field),
            exact,
            value,
            quoted,
        }))
    }

    /// Reads a `"..."` phrase starting at the opening quote.
    fn read_quoted(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        self.pos += 1;
        let mut result = String::new();
        while !self.at_end() {
            let c = self.current_char();
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(result),
                '\\' if !self.at_end() => {
                    let escaped = self.current_char();
                    self.pos += escaped.len_utf8();
                    if escaped != '"' && escaped != '\\' {
                        result.push('\\');
                    }
                    result.push(escaped);
                }
                _ => result.push(c),
            }
        }
        Err(QueryError::new(
            QueryErrorKind::UnterminatedQuote,
            "Missing closing quote",
            Span::new(start, self.input.len()),
        ))
    }
}
