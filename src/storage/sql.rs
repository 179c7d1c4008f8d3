//! Filter compilation for the SQLite document table
//!
//! Documents live as JSON text in one table; every predicate becomes a
//! comparison on `json_extract(doc, path)`. Paths and values are bound as
//! parameters, never spliced into the statement.

use rusqlite::types::Value as SqlValue;

use crate::query::{FieldValue, FilterSpec, Predicate, PredicateOp, PredicateValue};

/// Name of the document table
pub const TABLE: &str = "device_data";

/// A statement and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// JSON path of a top-level attribute
pub fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field)
}

fn bind(value: &FieldValue) -> SqlValue {
    match value {
        FieldValue::Text(s) => SqlValue::Text(s.clone()),
        FieldValue::Number(n) => SqlValue::Real(*n),
    }
}

fn values(value: &PredicateValue) -> Vec<&FieldValue> {
    match value {
        PredicateValue::One(v) => vec![v],
        PredicateValue::Set(vs) => vs.iter().collect(),
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn compile_predicate(predicate: &Predicate, params: &mut Vec<SqlValue>) -> String {
    let path = SqlValue::Text(json_path(&predicate.field));
    let items = values(&predicate.value);

    let comparison = match predicate.op {
        PredicateOp::Eq => "=",
        PredicateOp::Gte => ">=",
        PredicateOp::Lte => "<=",
        PredicateOp::Gt => ">",
        PredicateOp::Lt => "<",
        PredicateOp::In => {
            if items.is_empty() {
                return "0".to_string();
            }
            params.push(path);
            params.extend(items.iter().map(|v| bind(v)));
            return format!("json_extract(doc, ?) IN ({})", placeholders(items.len()));
        }
        PredicateOp::Nin => {
            if items.is_empty() {
                return "1".to_string();
            }
            // Records without the attribute are part of the complement
            params.push(path.clone());
            params.push(path);
            params.extend(items.iter().map(|v| bind(v)));
            return format!(
                "(json_extract(doc, ?) IS NULL OR json_extract(doc, ?) NOT IN ({}))",
                placeholders(items.len())
            );
        }
    };

    let Some(first) = items.first() else {
        return "0".to_string();
    };
    params.push(path);
    params.push(bind(first));
    format!("json_extract(doc, ?) {} ?", comparison)
}

/// Compile a filter specification into a single SELECT
pub fn compile(spec: &FilterSpec) -> CompiledQuery {
    let mut params = Vec::new();
    let clauses: Vec<String> = spec
        .all_predicates()
        .iter()
        .map(|p| compile_predicate(p, &mut params))
        .collect();

    params.push(SqlValue::Text(json_path(&spec.sort.field)));
    let direction = if spec.sort.descending { "DESC" } else { "ASC" };

    // seq keeps ties in storage order
    let sql = format!(
        "SELECT seq, doc FROM {} WHERE {} ORDER BY json_extract(doc, ?) {}, seq ASC",
        TABLE,
        clauses.join(" AND "),
        direction
    );

    CompiledQuery { sql, params }
}
