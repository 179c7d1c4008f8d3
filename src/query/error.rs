//! Query error types
//!
//! Parsing collects every problem it finds into [`ParseErrors`]; execution
//! failures are reported one at a time through [`QueryError`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::query::token::Span;
use crate::storage::StorageError;

/// Category of a parse problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// The query does not follow the grammar
    Syntax,
    /// The query is well formed but refers to something unsupported
    Validation,
}

/// One problem found while lexing or parsing a query
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{kind:?} error{}: {message}", span_suffix(.span))]
pub struct QueryIssue {
    pub kind: IssueKind,
    pub message: String,
    /// Location of the offending token, when there is one
    pub span: Option<Span>,
}

fn span_suffix(span: &Option<Span>) -> String {
    span.map(|s| format!(" at {}", s)).unwrap_or_default()
}

impl QueryIssue {
    pub fn syntax(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            kind: IssueKind::Syntax,
            message: message.into(),
            span,
        }
    }

    pub fn validation(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            kind: IssueKind::Validation,
            message: message.into(),
            span,
        }
    }
}

/// Every issue found in one query. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParseErrors(Vec<QueryIssue>);

impl ParseErrors {
    pub(crate) fn new(issues: Vec<QueryIssue>) -> Self {
        debug_assert!(!issues.is_empty());
        Self(issues)
    }

    pub fn issues(&self) -> &[QueryIssue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<QueryIssue> {
        self.0
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "Errors building query: [{}]", rendered.join("; "))
    }
}

impl std::error::Error for ParseErrors {}

/// Errors that can occur while executing a translated query
#[derive(Error, Debug)]
pub enum QueryError {
    /// The store failed to run the query or returned unreadable data
    #[error("Store error: {0}")]
    Store(#[from] StorageError),

    /// The query was cancelled or ran past its deadline
    #[error("Query aborted: {0}")]
    Aborted(String),
}

/// Result type for query execution
pub type QueryResult<T> = Result<T, QueryError>;
