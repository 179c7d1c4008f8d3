//! Query Parser
//!
//! Parses query text into a [`QueryDescriptor`], collecting every problem
//! instead of stopping at the first one.
//!
//! # Grammar
//!
//! ```text
//! query        := "METAQUERY" "WHERE" metaentry ("AND" metaentry)*
//!                 "QUERY" "TYPE" "IN" typelist whereClause? sortClause
//! metaentry    := metakey "IS" value
//! typelist     := identifier ("," identifier)*
//! whereClause  := "WHERE" condition ("AND" condition)*
//! condition    := field ( operator value | ["IS"] "IN" list | ["IS"] "NOT" "IN" list )
//! operator     := "IS" | ">=" | "<=" | ">" | "<"
//! list         := value ("," value)*
//! sortClause   := "SORT" "BY" field "AS" alias ["REVERSED"]
//! ```
//!
//! # Recovery
//!
//! Each clause parser records its own issues. When a clause cannot continue
//! it skips ahead to the next clause keyword (`AND`, `QUERY`, `WHERE`,
//! `SORT`) and parsing resumes from there. A clause that ends on a token
//! that cannot follow it reports that token before skipping, so the next
//! clause is still checked. `Invalid` tokens skipped this way are still
//! reported.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use crate::query::ast::*;
use crate::query::error::{ParseErrors, QueryIssue};
use crate::query::lexer::tokenize;
use crate::query::token::{Comparison, Keyword, Span, Token, TokenKind};

/// Parse a query string into a descriptor, or every issue found in it
pub fn build_query(text: &str) -> Result<QueryDescriptor, ParseErrors> {
    Parser::new(text).parse()
}

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
    issues: Vec<QueryIssue>,
}

const META_STOPS: &[Keyword] = &[Keyword::And, Keyword::Query, Keyword::Sort];
const TYPE_STOPS: &[Keyword] = &[Keyword::Where, Keyword::Sort];
const CONDITION_STOPS: &[Keyword] = &[Keyword::And, Keyword::Sort];

/// Human-readable description of what was found at a position
fn describe(token: Option<Token<'_>>) -> String {
    match token {
        Some(t) => format!("'{}'", t.literal),
        None => "end of query".to_string(),
    }
}

impl<'a> Parser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            tokens: tokenize(text),
            position: 0,
            issues: Vec::new(),
        }
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Some(t) if t.kind == TokenKind::Keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_separator(&mut self) -> bool {
        if matches!(self.peek(), Some(t) if t.kind == TokenKind::ListSeparator) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn syntax(&mut self, message: String, span: Option<Span>) {
        self.issues.push(QueryIssue::syntax(message, span));
    }

    fn validation(&mut self, message: String, span: Option<Span>) {
        self.issues.push(QueryIssue::validation(message, span));
    }

    /// Consume `keyword` or record a syntax issue at the current token
    fn expect_keyword(&mut self, keyword: Keyword, context: &str) -> bool {
        if self.eat_keyword(keyword) {
            return true;
        }
        let found = self.peek();
        self.syntax(
            format!("expected {} {}, found {}", keyword, context, describe(found)),
            found.map(|t| t.span),
        );
        false
    }

    fn already_reported(&self, span: Span) -> bool {
        self.issues.iter().any(|issue| issue.span == Some(span))
    }

    /// Skip tokens until one of `stops` (or the end), reporting invalid input
    fn synchronize(&mut self, stops: &[Keyword]) {
        while let Some(token) = self.peek() {
            if let TokenKind::Keyword(keyword) = token.kind {
                if stops.contains(&keyword) {
                    break;
                }
            }
            if token.kind == TokenKind::Invalid && !self.already_reported(token.span) {
                self.syntax(
                    format!("unrecognized input '{}'", token.literal),
                    Some(token.span),
                );
            }
            self.position += 1;
        }
    }

    /// A clause ended early. Report the token it stopped at and skip to
    /// the next of `stops` so the clauses after it are still checked.
    fn expect_clause_end(&mut self, context: &str, stops: &[Keyword]) {
        let Some(token) = self.peek() else {
            return;
        };
        if let TokenKind::Keyword(keyword) = token.kind {
            if stops.contains(&keyword) {
                return;
            }
        }
        if !self.already_reported(token.span) {
            let message = if token.kind == TokenKind::Invalid {
                format!("unrecognized input '{}'", token.literal)
            } else {
                format!("unexpected '{}' after {}", token.literal, context)
            };
            self.syntax(message, Some(token.span));
        }
        self.synchronize(stops);
    }

    pub fn parse(mut self) -> Result<QueryDescriptor, ParseErrors> {
        let meta_query = self.parse_meta_clause();
        self.expect_clause_end("the METAQUERY clause", &[Keyword::Query, Keyword::Sort]);
        let type_filter = self.parse_type_clause();
        self.expect_clause_end("the type list", TYPE_STOPS);
        let conditions = if self.at_keyword(Keyword::Where) {
            self.parse_where_clause()
        } else {
            Vec::new()
        };
        let sort = self.parse_sort_clause();
        self.reject_trailing();

        if !self.issues.is_empty() {
            return Err(ParseErrors::new(self.issues));
        }

        match (meta_query, type_filter, sort) {
            (Some(meta_query), Some(type_filter), Some(sort)) => Ok(QueryDescriptor {
                meta_query,
                type_filter,
                conditions,
                sort,
            }),
            _ => Err(ParseErrors::new(vec![QueryIssue::syntax(
                "incomplete query",
                None,
            )])),
        }
    }

    // ------------------------------------------------------------------
    // METAQUERY WHERE key IS value
    // ------------------------------------------------------------------

    fn parse_meta_clause(&mut self) -> Option<MetaQuery> {
        if !self.eat_keyword(Keyword::Metaquery) {
            let found = self.peek();
            self.syntax(
                format!(
                    "query must start with a METAQUERY clause, found {}",
                    describe(found)
                ),
                found.map(|t| t.span),
            );
            self.synchronize(&[Keyword::Query, Keyword::Sort]);
            return None;
        }
        if !self.expect_keyword(Keyword::Where, "after METAQUERY") {
            self.synchronize(&[Keyword::Query, Keyword::Sort]);
            return None;
        }

        let mut entries: Vec<MetaQuery> = Vec::new();
        let mut failed = false;
        loop {
            let start = self.peek().map(|t| t.span);
            match self.parse_meta_entry() {
                Some(entry) if entries.iter().any(|e| e.key == entry.key) => {
                    self.validation(format!("duplicate METAQUERY key '{}'", entry.key), start);
                    failed = true;
                }
                Some(entry) => entries.push(entry),
                None => failed = true,
            }
            if !self.eat_keyword(Keyword::And) {
                break;
            }
        }

        if entries.len() > 1 {
            let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
            self.validation(
                format!(
                    "METAQUERY takes exactly one key, found {}",
                    keys.join(" and ")
                ),
                None,
            );
            return None;
        }
        if failed {
            return None;
        }
        entries.pop()
    }

    fn parse_meta_entry(&mut self) -> Option<MetaQuery> {
        let key_token = match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                t
            }
            found => {
                self.syntax(
                    format!("expected a METAQUERY key, found {}", describe(found)),
                    found.map(|t| t.span),
                );
                self.synchronize(META_STOPS);
                return None;
            }
        };

        let key = MetaKey::from_str(key_token.literal);
        if key.is_none() {
            self.validation(
                format!(
                    "unsupported METAQUERY key '{}' (supported: userid, email)",
                    key_token.literal
                ),
                Some(key_token.span),
            );
        }

        if !self.expect_keyword(Keyword::Is, "after the METAQUERY key") {
            self.synchronize(META_STOPS);
            return None;
        }

        let value = match self.peek() {
            Some(t)
                if matches!(
                    t.kind,
                    TokenKind::Identifier | TokenKind::Number | TokenKind::Timestamp
                ) =>
            {
                self.advance();
                t.literal.to_string()
            }
            found => {
                self.syntax(
                    format!(
                        "expected a value for METAQUERY key '{}', found {}",
                        key_token.literal,
                        describe(found)
                    ),
                    found.map(|t| t.span),
                );
                self.synchronize(META_STOPS);
                return None;
            }
        };

        key.map(|key| MetaQuery { key, value })
    }

    // ------------------------------------------------------------------
    // QUERY TYPE IN a, b, c
    // ------------------------------------------------------------------

    fn parse_type_clause(&mut self) -> Option<BTreeSet<String>> {
        if !self.eat_keyword(Keyword::Query) {
            let found = self.peek();
            self.syntax(
                format!("missing QUERY TYPE IN clause, found {}", describe(found)),
                found.map(|t| t.span),
            );
            self.synchronize(TYPE_STOPS);
            return None;
        }
        if !self.expect_keyword(Keyword::Type, "after QUERY")
            || !self.expect_keyword(Keyword::In, "after QUERY TYPE")
        {
            self.synchronize(TYPE_STOPS);
            return None;
        }

        if self.at_list_end() {
            let found = self.peek();
            self.validation(
                "type list must not be empty".to_string(),
                found.map(|t| t.span),
            );
            return None;
        }

        let mut types = BTreeSet::new();
        let mut failed = false;
        loop {
            match self.peek() {
                Some(t) if t.kind == TokenKind::Identifier => {
                    self.advance();
                    if is_known_type(t.literal) {
                        types.insert(t.literal.to_string());
                    } else {
                        self.validation(
                            format!("unknown record type '{}'", t.literal),
                            Some(t.span),
                        );
                        failed = true;
                    }
                }
                found => {
                    self.syntax(
                        format!("expected a record type name, found {}", describe(found)),
                        found.map(|t| t.span),
                    );
                    self.synchronize(TYPE_STOPS);
                    return None;
                }
            }
            if !self.eat_separator() {
                break;
            }
        }

        if failed {
            None
        } else {
            Some(types)
        }
    }

    /// True when the next token closes a list before it started
    fn at_list_end(&self) -> bool {
        match self.peek() {
            None => true,
            Some(t) => matches!(
                t.kind,
                TokenKind::Keyword(Keyword::Where | Keyword::Sort | Keyword::And)
            ),
        }
    }

    // ------------------------------------------------------------------
    // WHERE condition AND condition ...
    // ------------------------------------------------------------------

    fn parse_where_clause(&mut self) -> Vec<Condition> {
        self.advance(); // WHERE
        let mut conditions = Vec::new();
        loop {
            if let Some(condition) = self.parse_condition() {
                conditions.push(condition);
            }
            self.expect_clause_end("a condition", CONDITION_STOPS);
            if !self.eat_keyword(Keyword::And) {
                break;
            }
        }
        conditions
    }

    fn parse_condition(&mut self) -> Option<Condition> {
        let field_token = match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                t
            }
            found => {
                self.syntax(
                    format!("expected a field name, found {}", describe(found)),
                    found.map(|t| t.span),
                );
                self.synchronize(CONDITION_STOPS);
                return None;
            }
        };
        let field = field_token.literal;
        let mut failed = false;
        if !is_known_field(field) {
            self.validation(format!("unknown field '{}'", field), Some(field_token.span));
            failed = true;
        }

        let Some(operator) = self.parse_operator(field) else {
            self.synchronize(CONDITION_STOPS);
            return None;
        };

        let value = if operator.takes_list() {
            self.parse_list(field).map(ConditionValue::List)
        } else {
            let before = self.position;
            let scalar = self.parse_scalar(field, operator);
            if scalar.is_none() && self.position == before {
                self.synchronize(CONDITION_STOPS);
            }
            scalar.map(ConditionValue::Scalar)
        };

        match value {
            Some(value) if !failed => Some(Condition {
                field: field.to_string(),
                operator,
                value,
            }),
            _ => None,
        }
    }

    fn parse_operator(&mut self, field: &str) -> Option<Operator> {
        let Some(token) = self.peek() else {
            self.syntax(
                format!("expected an operator after '{}', found end of query", field),
                None,
            );
            return None;
        };

        match token.kind {
            TokenKind::Keyword(Keyword::In) => {
                self.advance();
                Some(Operator::In)
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                self.expect_keyword(Keyword::In, "after NOT")
                    .then_some(Operator::NotIn)
            }
            TokenKind::Keyword(Keyword::Is) => {
                self.advance();
                if self.eat_keyword(Keyword::In) {
                    Some(Operator::In)
                } else if self.eat_keyword(Keyword::Not) {
                    self.expect_keyword(Keyword::In, "after IS NOT")
                        .then_some(Operator::NotIn)
                } else {
                    Some(Operator::Equals)
                }
            }
            TokenKind::Operator(op) => {
                self.advance();
                Some(match op {
                    Comparison::Gte => Operator::GreaterEqual,
                    Comparison::Lte => Operator::LessEqual,
                    Comparison::Gt => Operator::Greater,
                    Comparison::Lt => Operator::Less,
                })
            }
            TokenKind::Invalid | TokenKind::Identifier | TokenKind::Keyword(_) => {
                self.validation(
                    format!("unknown operator '{}' for field '{}'", token.literal, field),
                    Some(token.span),
                );
                None
            }
            _ => {
                self.syntax(
                    format!(
                        "expected an operator after '{}', found {}",
                        field,
                        describe(Some(token))
                    ),
                    Some(token.span),
                );
                None
            }
        }
    }

    fn parse_list(&mut self, field: &str) -> Option<Vec<Scalar>> {
        if self.at_list_end() {
            let found = self.peek();
            self.validation(
                format!("IN list for '{}' must not be empty", field),
                found.map(|t| t.span),
            );
            return None;
        }

        let mut items = Vec::new();
        let mut failed = false;
        loop {
            let before = self.position;
            match self.parse_scalar(field, Operator::In) {
                Some(item) => items.push(item),
                None if self.position == before => {
                    self.synchronize(CONDITION_STOPS);
                    return None;
                }
                None => failed = true,
            }
            if !self.eat_separator() {
                break;
            }
        }

        if failed {
            None
        } else {
            Some(items)
        }
    }

    /// Parse one literal. Returns `None` after recording an issue; the token
    /// is consumed unless it could not possibly be a value.
    fn parse_scalar(&mut self, field: &str, operator: Operator) -> Option<Scalar> {
        let found = self.peek();
        let Some(token) = found else {
            self.syntax(
                format!("expected a value for '{}', found end of query", field),
                None,
            );
            return None;
        };

        let scalar = match token.kind {
            TokenKind::Number => {
                self.advance();
                match token.literal.parse::<f64>() {
                    Ok(n) => Scalar::Number(n),
                    Err(_) => Scalar::Text(token.literal.to_string()),
                }
            }
            TokenKind::Identifier => {
                self.advance();
                Scalar::Text(token.literal.to_string())
            }
            TokenKind::Timestamp => {
                self.advance();
                match DateTime::parse_from_rfc3339(token.literal) {
                    // Stored instants carry milliseconds; a finer literal
                    // cannot be compared against them exactly
                    Ok(ts) if ts.timestamp_subsec_nanos() % 1_000_000 != 0 => {
                        self.validation(
                            format!(
                                "timestamp '{}' is more precise than milliseconds",
                                token.literal
                            ),
                            Some(token.span),
                        );
                        return None;
                    }
                    Ok(ts) => Scalar::Timestamp(ts.with_timezone(&Utc)),
                    Err(e) => {
                        self.validation(
                            format!("malformed timestamp '{}': {}", token.literal, e),
                            Some(token.span),
                        );
                        return None;
                    }
                }
            }
            TokenKind::Invalid => {
                self.advance();
                self.syntax(
                    format!("unrecognized input '{}'", token.literal),
                    Some(token.span),
                );
                return None;
            }
            _ => {
                self.syntax(
                    format!("expected a value for '{}', found {}", field, describe(found)),
                    Some(token.span),
                );
                return None;
            }
        };

        let is_range = !matches!(operator, Operator::In | Operator::NotIn | Operator::Equals);
        if is_instant_field(field) && is_range && !matches!(scalar, Scalar::Timestamp(_)) {
            self.validation(
                format!(
                    "field '{}' must be compared with an RFC3339 timestamp, found '{}'",
                    field, token.literal
                ),
                Some(token.span),
            );
            return None;
        }

        Some(scalar)
    }

    // ------------------------------------------------------------------
    // SORT BY field AS alias [REVERSED]
    // ------------------------------------------------------------------

    fn parse_sort_clause(&mut self) -> Option<SortClause> {
        if !self.at_keyword(Keyword::Sort) {
            let found = self.peek();
            let message = match found {
                None => "missing SORT BY clause".to_string(),
                Some(t) => format!("expected SORT BY clause, found '{}'", t.literal),
            };
            self.syntax(message, found.map(|t| t.span));
            self.synchronize(&[Keyword::Sort]);
            if !self.at_keyword(Keyword::Sort) {
                return None;
            }
        }
        self.advance(); // SORT

        if !self.expect_keyword(Keyword::By, "after SORT") {
            self.synchronize(&[]);
            return None;
        }

        let field = match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                t
            }
            found => {
                self.syntax(
                    format!("expected a sort field, found {}", describe(found)),
                    found.map(|t| t.span),
                );
                self.synchronize(&[]);
                return None;
            }
        };
        let known = is_known_field(field.literal);
        if !known {
            self.validation(
                format!("unknown sort field '{}'", field.literal),
                Some(field.span),
            );
        }

        if !self.expect_keyword(Keyword::As, "after the sort field") {
            self.synchronize(&[]);
            return None;
        }

        let alias = match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                self.advance();
                if t.literal != field.literal && is_known_field(t.literal) {
                    self.validation(
                        format!("sort alias '{}' collides with a record field", t.literal),
                        Some(t.span),
                    );
                }
                t.literal.to_string()
            }
            found => {
                self.syntax(
                    format!("expected an alias after AS, found {}", describe(found)),
                    found.map(|t| t.span),
                );
                self.synchronize(&[]);
                return None;
            }
        };

        let descending = self.eat_keyword(Keyword::Reversed);

        let alias_free = alias == field.literal || !is_known_field(&alias);
        (known && alias_free).then(|| SortClause {
            field: field.literal.to_string(),
            output_alias: alias,
            descending,
        })
    }

    fn reject_trailing(&mut self) {
        if let Some(token) = self.peek() {
            if !self.already_reported(token.span) {
                self.syntax(
                    format!("unexpected '{}' after SORT clause", token.literal),
                    Some(token.span),
                );
            }
            self.synchronize(&[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::IssueKind;
    use chrono::TimeZone;

    const QUERY_WHERE_AND: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings WHERE time >= 2014-10-23T07:00:00.000Z AND time < 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED";
    const QUERY_WHERE: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal WHERE time <= 2014-10-23T08:00:00.000Z SORT BY time AS Timestamp REVERSED";
    const QUERY_WHERE_IN: &str = "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal, settings WHERE uploadId NOT IN test-data3, test-data2 SORT BY time AS Timestamp REVERSED";

    fn messages(errors: &ParseErrors) -> Vec<String> {
        errors.issues().iter().map(|i| i.message.clone()).collect()
    }

    #[test]
    fn test_parse_where_and() {
        let query = build_query(QUERY_WHERE_AND).unwrap();

        assert_eq!(query.meta_query.key, MetaKey::UserId);
        assert_eq!(query.meta_query.value, "1234");
        assert_eq!(
            query.type_filter.iter().collect::<Vec<_>>(),
            vec!["settings"]
        );
        assert_eq!(query.conditions.len(), 2);
        assert_eq!(query.conditions[0].field, "time");
        assert_eq!(query.conditions[0].operator, Operator::GreaterEqual);
        assert_eq!(
            query.conditions[0].value,
            ConditionValue::Scalar(Scalar::Timestamp(
                Utc.with_ymd_and_hms(2014, 10, 23, 7, 0, 0).unwrap()
            ))
        );
        assert_eq!(query.conditions[1].operator, Operator::Less);
        assert_eq!(
            query.sort,
            SortClause {
                field: "time".to_string(),
                output_alias: "Timestamp".to_string(),
                descending: true,
            }
        );
    }

    #[test]
    fn test_parse_where_single() {
        let query = build_query(QUERY_WHERE).unwrap();
        assert_eq!(query.conditions.len(), 1);
        assert_eq!(query.conditions[0].operator, Operator::LessEqual);
    }

    #[test]
    fn test_parse_not_in_list() {
        let query = build_query(QUERY_WHERE_IN).unwrap();

        assert_eq!(
            query.type_filter.iter().collect::<Vec<_>>(),
            vec!["basal", "settings"]
        );
        assert_eq!(query.conditions.len(), 1);
        assert_eq!(query.conditions[0].field, "uploadId");
        assert_eq!(query.conditions[0].operator, Operator::NotIn);
        assert_eq!(
            query.conditions[0].value,
            ConditionValue::List(vec![
                Scalar::Text("test-data3".to_string()),
                Scalar::Text("test-data2".to_string()),
            ])
        );
    }

    #[test]
    fn test_parse_is_deterministic() {
        for text in [QUERY_WHERE_AND, QUERY_WHERE, QUERY_WHERE_IN] {
            assert_eq!(build_query(text).unwrap(), build_query(text).unwrap());
        }
    }

    #[test]
    fn test_parse_without_where_or_reversed() {
        let query = build_query(
            "METAQUERY WHERE userid IS abc QUERY TYPE IN cbg SORT BY time AS Time",
        )
        .unwrap();
        assert!(query.conditions.is_empty());
        assert!(!query.sort.descending);
    }

    #[test]
    fn test_parse_in_and_equality_forms() {
        let query = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE uploadId IN a, b AND deliveryType IS IN scheduled AND units IS mg/dL AND rate > 0.5 SORT BY time AS t",
        )
        .unwrap();
        let operators: Vec<_> = query.conditions.iter().map(|c| c.operator).collect();
        assert_eq!(
            operators,
            vec![
                Operator::In,
                Operator::In,
                Operator::Equals,
                Operator::Greater
            ]
        );
        assert_eq!(
            query.conditions[2].value,
            ConditionValue::Scalar(Scalar::Text("mg/dL".to_string()))
        );
        assert_eq!(
            query.conditions[3].value,
            ConditionValue::Scalar(Scalar::Number(0.5))
        );
    }

    #[test]
    fn test_duplicate_conditions_on_field_are_allowed() {
        let query = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE time > 2014-10-23T07:00:00.000Z AND time > 2014-10-23T07:30:00.000Z SORT BY time AS t",
        )
        .unwrap();
        assert_eq!(query.conditions.len(), 2);
    }

    #[test]
    fn test_email_meta_key() {
        let query = build_query(
            "METAQUERY WHERE email IS jo@example.com QUERY TYPE IN smbg SORT BY time AS t",
        )
        .unwrap();
        assert_eq!(
            query.meta_query.user_ref(),
            UserRef::ByEmail("jo@example.com".to_string())
        );
    }

    #[test]
    fn test_type_list_deduplicates() {
        let query = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal, basal, cbg SORT BY time AS t",
        )
        .unwrap();
        assert_eq!(query.type_filter.len(), 2);
    }

    #[test]
    fn test_missing_metaquery() {
        let errors =
            build_query("QUERY TYPE IN basal SORT BY time AS Timestamp").unwrap_err();
        assert!(!errors.is_empty());
        assert!(messages(&errors)[0].contains("METAQUERY"));
    }

    #[test]
    fn test_missing_query_type() {
        let errors =
            build_query("METAQUERY WHERE userid IS 1 SORT BY time AS Timestamp").unwrap_err();
        assert!(messages(&errors)
            .iter()
            .any(|m| m.contains("missing QUERY TYPE IN clause")));
    }

    #[test]
    fn test_missing_sort() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE time <= 2014-10-23T08:00:00.000Z",
        )
        .unwrap_err();
        assert_eq!(messages(&errors), vec!["missing SORT BY clause"]);
        assert_eq!(errors.issues()[0].kind, IssueKind::Syntax);
    }

    #[test]
    fn test_missing_alias() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal SORT BY time REVERSED",
        )
        .unwrap_err();
        assert!(messages(&errors)[0].contains("expected AS"));
    }

    #[test]
    fn test_errors_accumulate() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN WHERE time = 2014-10-23T07:00:00.000Z SORT BY time AS Timestamp",
        )
        .unwrap_err();

        let msgs = messages(&errors);
        assert_eq!(msgs.len(), 2, "{:?}", msgs);
        assert_eq!(msgs[0], "type list must not be empty");
        assert_eq!(msgs[1], "unknown operator '=' for field 'time'");
        assert!(errors
            .issues()
            .iter()
            .all(|i| i.kind == IssueKind::Validation));
    }

    #[test]
    fn test_errors_across_every_clause() {
        let errors = build_query(
            "METAQUERY WHERE groupid IS 1 QUERY TYPE IN pizza WHERE colour IS red AND time > 2014-13-45T07:00:00.000Z SORT BY flavour AS f",
        )
        .unwrap_err();

        let msgs = messages(&errors);
        assert_eq!(msgs.len(), 5, "{:?}", msgs);
        assert!(msgs[0].starts_with("unsupported METAQUERY key 'groupid'"));
        assert_eq!(msgs[1], "unknown record type 'pizza'");
        assert_eq!(msgs[2], "unknown field 'colour'");
        assert!(msgs[3].starts_with("malformed timestamp '2014-13-45T07:00:00.000Z'"));
        assert_eq!(msgs[4], "unknown sort field 'flavour'");
    }

    #[test]
    fn test_empty_in_list() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE uploadId NOT IN SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(messages(&errors), vec!["IN list for 'uploadId' must not be empty"]);
    }

    #[test]
    fn test_trailing_comma_in_list() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE uploadId IN a, SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["expected a value for 'uploadId', found 'SORT'"]
        );
    }

    #[test]
    fn test_duplicate_meta_key() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 AND userid IS 2 QUERY TYPE IN basal SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(messages(&errors), vec!["duplicate METAQUERY key 'userid'"]);
    }

    #[test]
    fn test_two_meta_keys() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 AND email IS a@b.c QUERY TYPE IN basal SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["METAQUERY takes exactly one key, found userid and email"]
        );
    }

    #[test]
    fn test_instant_field_requires_timestamp() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE time > yesterday SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["field 'time' must be compared with an RFC3339 timestamp, found 'yesterday'"]
        );
    }

    #[test]
    fn test_invalid_characters_are_reported() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal WHERE rate > 1 ; SORT BY time AS t",
        )
        .unwrap_err();
        let msgs = messages(&errors);
        assert_eq!(msgs, vec!["unrecognized input ';'"]);
        assert_eq!(errors.issues()[0].span, Some(Span::new(63, 64)));
    }

    #[test]
    fn test_missing_type_separator_still_checks_conditions() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal settings WHERE colour IS red SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "unexpected 'settings' after the type list",
                "unknown field 'colour'"
            ]
        );
        assert_eq!(errors.issues()[0].kind, IssueKind::Syntax);
        assert_eq!(errors.issues()[1].kind, IssueKind::Validation);
    }

    #[test]
    fn test_stray_word_between_conditions() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN basal WHERE rate > 1 junk AND colour IS red AND time > 2014-13-45T07:00:00.000Z SORT BY time AS t",
        )
        .unwrap_err();
        let msgs = messages(&errors);
        assert_eq!(msgs.len(), 3, "{:?}", msgs);
        assert_eq!(msgs[0], "unexpected 'junk' after a condition");
        assert_eq!(msgs[1], "unknown field 'colour'");
        assert!(msgs[2].starts_with("malformed timestamp '2014-13-45T07:00:00.000Z'"));
    }

    #[test]
    fn test_stray_word_after_meta_clause() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 extra QUERY TYPE IN pizza SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "unexpected 'extra' after the METAQUERY clause",
                "unknown record type 'pizza'"
            ]
        );
    }

    #[test]
    fn test_alias_may_not_replace_another_field() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings SORT BY time AS type",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["sort alias 'type' collides with a record field"]
        );
        assert_eq!(errors.issues()[0].kind, IssueKind::Validation);

        let query = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings SORT BY time AS time",
        )
        .unwrap();
        assert_eq!(query.sort.output_alias, "time");
    }

    #[test]
    fn test_sub_millisecond_timestamps_are_rejected() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings WHERE time >= 2014-10-23T07:15:00.0005Z AND time < 2014-10-23T08:00:00.000Z SORT BY time AS t",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["timestamp '2014-10-23T07:15:00.0005Z' is more precise than milliseconds"]
        );

        let query = build_query(
            "METAQUERY WHERE userid IS 1234 QUERY TYPE IN settings WHERE time >= 2014-10-23T07:15:00.001000Z SORT BY time AS t",
        )
        .unwrap();
        let ConditionValue::Scalar(bound) = &query.conditions[0].value else {
            panic!("expected a scalar bound");
        };
        assert_eq!(bound.to_string(), "2014-10-23T07:15:00.001Z");
    }

    #[test]
    fn test_trailing_input() {
        let errors = build_query(
            "METAQUERY WHERE userid IS 1 QUERY TYPE IN basal SORT BY time AS t REVERSED extra ! stuff",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec!["unexpected 'extra' after SORT clause", "unrecognized input '!'"]
        );
    }

    #[test]
    fn test_empty_query() {
        let errors = build_query("").unwrap_err();
        let msgs = messages(&errors);
        assert_eq!(msgs.len(), 3, "{:?}", msgs);
        assert!(msgs[0].contains("METAQUERY"));
        assert!(msgs[1].contains("QUERY TYPE IN"));
        assert_eq!(msgs[2], "missing SORT BY clause");
    }
}
