//! Query Translator
//!
//! Turns a [`QueryDescriptor`] plus the resolved internal storage id of its
//! target user into a backend-neutral [`FilterSpec`]. Pure: no I/O, no
//! shared state.

use serde::Serialize;
use std::collections::BTreeSet;

use crate::query::ast::{ConditionValue, Operator, QueryDescriptor, Scalar};

/// Attribute holding the internal storage id of a record's owner
pub const OWNER_FIELD: &str = "_groupId";

/// Attribute holding the record type
pub const TYPE_FIELD: &str = "type";

/// A translated query, ready for a store adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    pub type_filter: BTreeSet<String>,
    pub internal_user_id: String,
    /// Translated conditions, in source order
    pub predicates: Vec<Predicate>,
    pub sort: SortSpec,
    /// Name the sort field is renamed to in every result record
    pub output_alias: String,
}

impl FilterSpec {
    /// Owner and type restrictions as set-membership predicates, followed by
    /// the translated conditions
    pub fn all_predicates(&self) -> Vec<Predicate> {
        let mut all = Vec::with_capacity(self.predicates.len() + 2);
        all.push(Predicate {
            field: OWNER_FIELD.to_string(),
            op: PredicateOp::In,
            value: PredicateValue::Set(vec![FieldValue::Text(self.internal_user_id.clone())]),
        });
        all.push(Predicate {
            field: TYPE_FIELD.to_string(),
            op: PredicateOp::In,
            value: PredicateValue::Set(
                self.type_filter
                    .iter()
                    .map(|t| FieldValue::Text(t.clone()))
                    .collect(),
            ),
        });
        all.extend(self.predicates.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub op: PredicateOp,
    pub value: PredicateValue,
}

/// Backend-neutral operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Gte,
    Lte,
    Gt,
    Lt,
    In,
    Nin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredicateValue {
    One(FieldValue),
    Set(Vec<FieldValue>),
}

/// Values as the store sees them. Instants are stored as canonical text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl From<&Scalar> for FieldValue {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Text(s) => FieldValue::Text(s.clone()),
            Scalar::Number(n) => FieldValue::Number(*n),
            Scalar::Timestamp(ts) => FieldValue::Text(Scalar::canonical_timestamp(ts)),
        }
    }
}

/// Translate a parsed query for the user stored under `internal_user_id`
pub fn translate(descriptor: &QueryDescriptor, internal_user_id: &str) -> FilterSpec {
    let predicates = descriptor
        .conditions
        .iter()
        .map(|condition| {
            let op = match condition.operator {
                // Equality on the type attribute is membership in a one-element set
                Operator::Equals if condition.field == TYPE_FIELD => PredicateOp::In,
                Operator::Equals => PredicateOp::Eq,
                Operator::GreaterEqual => PredicateOp::Gte,
                Operator::LessEqual => PredicateOp::Lte,
                Operator::Greater => PredicateOp::Gt,
                Operator::Less => PredicateOp::Lt,
                Operator::In => PredicateOp::In,
                Operator::NotIn => PredicateOp::Nin,
            };
            let value = match (&condition.value, op) {
                (ConditionValue::Scalar(s), PredicateOp::In) => {
                    PredicateValue::Set(vec![FieldValue::from(s)])
                }
                (ConditionValue::Scalar(s), _) => PredicateValue::One(FieldValue::from(s)),
                (ConditionValue::List(items), _) => {
                    PredicateValue::Set(items.iter().map(FieldValue::from).collect())
                }
            };
            Predicate {
                field: condition.field.clone(),
                op,
                value,
            }
        })
        .collect();

    FilterSpec {
        type_filter: descriptor.type_filter.clone(),
        internal_user_id: internal_user_id.to_string(),
        predicates,
        sort: SortSpec {
            field: descriptor.sort.field.clone(),
            descending: descriptor.sort.descending,
        },
        output_alias: descriptor.sort.output_alias.clone(),
    }
}
