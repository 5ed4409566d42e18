//! Payload predicates applied after similarity ranking
//!
//! Paths are dotted (`specs.color`) and walk nested JSON objects. Numbers
//! compare as f64, strings lexicographically; comparing values of different
//! kinds never matches.

use semsearch_common::{Result, SemsearchError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;

use crate::types::Payload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    /// Field present and not null
    Exists { field: String },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And { filters }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Self::Eq { field, value } => lookup(payload, field).is_some_and(|v| same(v, value)),
            Self::Ne { field, value } => !lookup(payload, field).is_some_and(|v| same(v, value)),
            Self::In { field, values } => {
                lookup(payload, field).is_some_and(|v| values.iter().any(|x| same(v, x)))
            }
            Self::Gt { field, value } => ordered(payload, field, value, |o| o == Ordering::Greater),
            Self::Gte { field, value } => ordered(payload, field, value, |o| o != Ordering::Less),
            Self::Lt { field, value } => ordered(payload, field, value, |o| o == Ordering::Less),
            Self::Lte { field, value } => ordered(payload, field, value, |o| o != Ordering::Greater),
            Self::Exists { field } => lookup(payload, field).is_some_and(|v| !v.is_null()),
            Self::And { filters } => filters.iter().all(|f| f.matches(payload)),
            Self::Or { filters } => filters.iter().any(|f| f.matches(payload)),
            Self::Not { filter } => !filter.matches(payload),
        }
    }

    /// Parse one CLI clause: `field=value`, `field!=value`, `field>=3`,
    /// `field<10`, `field?`
    pub fn parse(clause: &str) -> Result<Self> {
        let clause = clause.trim();
        if let Some(field) = clause.strip_suffix('?') {
            return Ok(Self::exists(check_field(field, clause)?));
        }

        let (pos, op) = find_operator(clause).ok_or_else(|| {
            SemsearchError::invalid_parameter(format!("filter '{}' has no operator", clause))
        })?;
        let field = check_field(&clause[..pos], clause)?;
        let value = parse_value(clause[pos + op.len()..].trim());

        Ok(match op {
            "!=" => Self::Ne { field, value },
            ">=" => Self::Gte { field, value },
            "<=" => Self::Lte { field, value },
            ">" => Self::Gt { field, value },
            "<" => Self::Lt { field, value },
            _ => Self::Eq { field, value },
        })
    }

    /// Parse several clauses into one conjunction
    pub fn parse_all<S: AsRef<str>>(clauses: &[S]) -> Result<Option<Self>> {
        let mut filters = clauses
            .iter()
            .map(|c| Self::parse(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Self::and(filters)),
        })
    }
}

impl FromStr for Filter {
    type Err = SemsearchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn lookup<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = payload.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn ordered(payload: &Payload, field: &str, value: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    lookup(payload, field)
        .and_then(|v| compare(v, value))
        .is_some_and(accept)
}

fn find_operator(clause: &str) -> Option<(usize, &'static str)> {
    let bytes = clause.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let next = bytes.get(i + 1).copied();
        let op = match (b, next) {
            (b'!', Some(b'=')) => "!=",
            (b'>', Some(b'=')) => ">=",
            (b'<', Some(b'=')) => "<=",
            (b'=', _) => "=",
            (b'>', _) => ">",
            (b'<', _) => "<",
            _ => continue,
        };
        return Some((i, op));
    }
    None
}

fn check_field(field: &str, clause: &str) -> Result<String> {
    let field = field.trim();
    if field.is_empty() || field.split('.').any(str::is_empty) {
        return Err(SemsearchError::invalid_parameter(format!(
            "filter '{}' has an empty field name",
            clause
        )));
    }
    Ok(field.to_string())
}

/// JSON literal when it parses as one, plain string otherwise
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
