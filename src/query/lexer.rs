//! Query Lexer
//!
//! Splits raw query text into tokens. Lexing never fails: characters that
//! cannot start a token are emitted as `Invalid` tokens so the parser can
//! report them alongside every other problem in the query.

use regex::Regex;
use std::sync::OnceLock;

use crate::query::token::{Comparison, Keyword, Span, Token, TokenKind};

/// Shape of an RFC3339 timestamp. Validity is checked by the parser.
fn timestamp_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2}").expect("timestamp pattern is valid")
    })
}

/// Characters allowed inside identifiers, numbers and timestamps
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@' | '+' | '/')
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token<'a> {
        Token {
            kind,
            literal: &self.input[start..self.position],
            span: Span::new(start, self.position),
        }
    }

    /// Read a run of word characters and classify it
    fn read_word(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if is_word_char(c) {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.input[start..self.position];
        self.token(classify_word(word), start)
    }

    /// Read `>`, `>=`, `<` or `<=`
    fn read_comparison(&mut self, first: char, start: usize) -> Token<'a> {
        let inclusive = self.peek() == Some('=');
        if inclusive {
            self.bump();
        }
        let op = match (first, inclusive) {
            ('>', true) => Comparison::Gte,
            ('>', false) => Comparison::Gt,
            ('<', true) => Comparison::Lte,
            _ => Comparison::Lt,
        };
        self.token(TokenKind::Operator(op), start)
    }
}

fn classify_word(word: &str) -> TokenKind {
    if let Some(keyword) = Keyword::from_word(word) {
        return TokenKind::Keyword(keyword);
    }
    if timestamp_shape().is_match(word) {
        return TokenKind::Timestamp;
    }
    let numeric_start = word
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '-' || c == '.')
        .unwrap_or(false);
    if numeric_start && word.parse::<f64>().is_ok() {
        return TokenKind::Number;
    }
    TokenKind::Identifier
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;
        let c = self.bump()?;

        let token = match c {
            ',' => self.token(TokenKind::ListSeparator, start),
            '>' | '<' => self.read_comparison(c, start),
            c if is_word_char(c) => self.read_word(start),
            _ => self.token(TokenKind::Invalid, start),
        };
        Some(token)
    }
}

/// Tokenize a complete query string
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    Lexer::new(text).collect()
}
