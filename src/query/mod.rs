//! Device Data Query Language
//!
//! Turns query text into store results:
//!
//! - **Lexer**: Split query text into spanned tokens
//! - **Parser**: Build a [`QueryDescriptor`], collecting every error found
//! - **Translator**: Lower a descriptor into a backend-neutral [`FilterSpec`]
//! - **Executor**: Run a filter against a store and shape the records
//!
//! # Query Language
//!
//! ```text
//! METAQUERY WHERE userid IS <id> [AND ...]
//! QUERY TYPE IN <type>[, <type>...]
//! [WHERE <field> <op> <value> [AND ...]]
//! SORT BY <field> AS <alias> [REVERSED]
//! ```
//!
//! where `<op>` is `IS`, `>=`, `<=`, `>`, `<`, `IN` or `NOT IN`.
//!
//! # Example
//!
//! ```rust,ignore
//! use device_query::query::{build_query, translate, QueryExecutor};
//!
//! let descriptor = build_query(
//!     "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal \
//!      WHERE time <= 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED",
//! )?;
//! let spec = translate(&descriptor, &internal_id);
//! let records = executor.execute(&spec).await?;
//! ```

mod ast;
mod error;
mod executor;
mod lexer;
mod parser;
mod token;
mod translator;

pub use ast::{
    is_instant_field, is_known_field, is_known_type, Condition, ConditionValue, MetaKey,
    MetaQuery, Operator, QueryDescriptor, Scalar, SortClause, UserRef, INSTANT_FIELDS,
    KNOWN_FIELDS, KNOWN_TYPES,
};
pub use error::{IssueKind, ParseErrors, QueryError, QueryIssue, QueryResult};
pub use executor::{QueryExecutor, DEFAULT_QUERY_TIMEOUT};
pub use lexer::{tokenize, Lexer};
pub use parser::build_query;
pub use token::{Comparison, Keyword, Span, Token, TokenKind};
pub use translator::{
    translate, FieldValue, FilterSpec, Predicate, PredicateOp, PredicateValue, SortSpec,
    OWNER_FIELD, TYPE_FIELD,
};
