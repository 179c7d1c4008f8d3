//! Query Descriptor
//!
//! The parsed, semantically checked form of one query:
//!
//! ```text
//! METAQUERY WHERE userid IS 1234
//! QUERY TYPE IN basal, settings
//! WHERE time >= 2014-10-23T07:00:00.000Z AND uploadId NOT IN a, b
//! SORT BY time AS Timestamp REVERSED
//! ```
//!
//! A descriptor only exists when parsing succeeded, so every invariant
//! (known fields and types, valid timestamps, non-empty lists) holds for it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Record attributes that conditions and the sort clause may reference
pub const KNOWN_FIELDS: &[&str] = &[
    "time",
    "deviceTime",
    "createdTime",
    "modifiedTime",
    "timezoneOffset",
    "conversionOffset",
    "clockDriftOffset",
    "type",
    "subType",
    "deliveryType",
    "uploadId",
    "deviceId",
    "source",
    "id",
    "value",
    "units",
    "rate",
    "duration",
    "percent",
    "scheduleName",
    "activeSchedule",
    "normal",
    "extended",
    "expectedNormal",
    "carbInput",
    "insulinOnBoard",
];

/// Attributes holding instants. Comparisons on them need timestamp literals.
pub const INSTANT_FIELDS: &[&str] = &["time", "createdTime", "modifiedTime"];

/// Record types a query may select
pub const KNOWN_TYPES: &[&str] = &[
    "basal",
    "bolus",
    "cbg",
    "smbg",
    "settings",
    "pumpSettings",
    "cgmSettings",
    "wizard",
    "deviceEvent",
    "deviceMeta",
    "upload",
    "food",
    "note",
    "urineKetone",
    "bloodKetone",
];

pub fn is_known_field(name: &str) -> bool {
    KNOWN_FIELDS.contains(&name)
}

pub fn is_instant_field(name: &str) -> bool {
    INSTANT_FIELDS.contains(&name)
}

pub fn is_known_type(name: &str) -> bool {
    KNOWN_TYPES.contains(&name)
}

/// A successfully parsed query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryDescriptor {
    /// Selects the owning user
    pub meta_query: MetaQuery,
    /// Record types to include
    pub type_filter: BTreeSet<String>,
    /// Conditions combined by AND, in source order
    pub conditions: Vec<Condition>,
    pub sort: SortClause,
}

/// Supported METAQUERY keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKey {
    /// External user id
    UserId,
    /// Email address, used interchangeably with the external id
    Email,
}

impl MetaKey {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "userid" => Some(Self::UserId),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserId => "userid",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for MetaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The METAQUERY clause: exactly one key and its value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaQuery {
    pub key: MetaKey,
    pub value: String,
}

impl MetaQuery {
    /// The user this query targets, tagged by how it was identified
    pub fn user_ref(&self) -> UserRef {
        match self.key {
            MetaKey::UserId => UserRef::ByExternalId(self.value.clone()),
            MetaKey::Email => UserRef::ByEmail(self.value.clone()),
        }
    }
}

/// A reference to a user as written by the query author
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum UserRef {
    ByExternalId(String),
    ByEmail(String),
}

impl UserRef {
    /// The raw identifier, whichever form it takes
    pub fn as_str(&self) -> &str {
        match self {
            Self::ByExternalId(id) => id,
            Self::ByEmail(email) => email,
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByExternalId(id) => write!(f, "userid {}", id),
            Self::ByEmail(email) => write!(f, "email {}", email),
        }
    }
}

/// A single field/operator/value predicate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: ConditionValue,
}

/// Condition operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    In,
    NotIn,
}

impl Operator {
    /// True for IN and NOT IN, which take a list
    pub fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => write!(f, "IS"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LessEqual => write!(f, "<="),
            Self::Greater => write!(f, ">"),
            Self::Less => write!(f, "<"),
            Self::In => write!(f, "IN"),
            Self::NotIn => write!(f, "NOT IN"),
        }
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Scalar(Scalar),
    /// Non-empty, in source order
    List(Vec<Scalar>),
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// Canonical stored form of an instant: UTC with millisecond precision
    pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Timestamp(ts) => write!(f, "{}", Self::canonical_timestamp(ts)),
        }
    }
}

/// SORT BY clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortClause {
    pub field: String,
    /// Name the sort field is exposed under in results
    pub output_alias: String,
    pub descending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_meta_key_from_str() {
        assert_eq!(MetaKey::from_str("userid"), Some(MetaKey::UserId));
        assert_eq!(MetaKey::from_str("email"), Some(MetaKey::Email));
        assert_eq!(MetaKey::from_str("USERID"), None);
        assert_eq!(MetaKey::from_str("groupid"), None);
    }

    #[test]
    fn test_user_ref_follows_meta_key() {
        let by_id = MetaQuery {
            key: MetaKey::UserId,
            value: "1234".to_string(),
        };
        assert_eq!(by_id.user_ref(), UserRef::ByExternalId("1234".to_string()));

        let by_email = MetaQuery {
            key: MetaKey::Email,
            value: "jo@example.com".to_string(),
        };
        assert_eq!(
            by_email.user_ref(),
            UserRef::ByEmail("jo@example.com".to_string())
        );
        assert_eq!(by_email.user_ref().as_str(), "jo@example.com");
    }

    #[test]
    fn test_canonical_timestamp() {
        let ts = Utc.with_ymd_and_hms(2014, 10, 23, 7, 0, 0).unwrap();
        assert_eq!(Scalar::canonical_timestamp(&ts), "2014-10-23T07:00:00.000Z");
    }

    #[test]
    fn test_schema_lookups() {
        assert!(is_known_field("uploadId"));
        assert!(!is_known_field("_groupId"));
        assert!(is_instant_field("time"));
        assert!(!is_instant_field("uploadId"));
        assert!(is_known_type("basal"));
        assert!(!is_known_type("Basal"));
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(Operator::NotIn.to_string(), "NOT IN");
        assert_eq!(Operator::GreaterEqual.to_string(), ">=");
        assert!(Operator::In.takes_list());
        assert!(!Operator::Equals.takes_list());
    }
}
