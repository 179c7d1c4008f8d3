//! Query Tokens
//!
//! Token definitions produced by the lexer and consumed by the parser.

use serde::Serialize;
use std::fmt;

/// A single lexical unit of a query, with its source text and location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// Exact source text of the token
    pub literal: &'a str,
    pub span: Span,
}

/// The kind of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    Operator(Comparison),
    Identifier,
    /// A word shaped like an RFC3339 timestamp (validated by the parser)
    Timestamp,
    Number,
    /// `,`
    ListSeparator,
    /// Unrecognized input
    Invalid,
}

/// Reserved words. Matched case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Metaquery,
    Where,
    Query,
    Type,
    In,
    Not,
    And,
    Sort,
    By,
    As,
    Reversed,
    Is,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "METAQUERY" => Some(Self::Metaquery),
            "WHERE" => Some(Self::Where),
            "QUERY" => Some(Self::Query),
            "TYPE" => Some(Self::Type),
            "IN" => Some(Self::In),
            "NOT" => Some(Self::Not),
            "AND" => Some(Self::And),
            "SORT" => Some(Self::Sort),
            "BY" => Some(Self::By),
            "AS" => Some(Self::As),
            "REVERSED" => Some(Self::Reversed),
            "IS" => Some(Self::Is),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metaquery => "METAQUERY",
            Self::Where => "WHERE",
            Self::Query => "QUERY",
            Self::Type => "TYPE",
            Self::In => "IN",
            Self::Not => "NOT",
            Self::And => "AND",
            Self::Sort => "SORT",
            Self::By => "BY",
            Self::As => "AS",
            Self::Reversed => "REVERSED",
            Self::Is => "IS",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gte, // >=
    Lte, // <=
    Gt,  // >
    Lt,  // <
}

/// Byte range of a token in the query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
