//! Row filters and value ordering.

use crate::backend::Row;
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over rows.
///
/// This is the minimal predicate surface the replica needs to talk to a
/// store: equality, membership, string prefix and boolean composition.
/// Missing columns compare as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// Column equals value.
    Eq(String, Value),
    /// Column equals one of the values.
    In(String, Vec<Value>),
    /// Text column starts with the prefix.
    StartsWith(String, String),
    /// Every sub-filter matches.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// Sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Creates an equality filter.
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    /// Creates a membership filter.
    #[must_use]
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(column.into(), values)
    }

    /// Creates a prefix filter.
    #[must_use]
    pub fn starts_with(column: impl Into<String>, prefix: impl Into<String>) -> Self {
        Filter::StartsWith(column.into(), prefix.into())
    }

    /// Builds a filter matching rows whose columns equal every entry of
    /// `record` (a "predicate record").
    #[must_use]
    pub fn matching(record: &Row) -> Self {
        if record.is_empty() {
            return Filter::All;
        }
        Filter::And(
            record
                .iter()
                .map(|(column, value)| Filter::Eq(column.clone(), value.clone()))
                .collect(),
        )
    }

    /// Evaluates the filter against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(column, expected) => value_eq(column_value(row, column), expected),
            Filter::In(column, candidates) => {
                let actual = column_value(row, column);
                candidates.iter().any(|c| value_eq(actual, c))
            }
            Filter::StartsWith(column, prefix) => column_value(row, column)
                .as_str()
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(inner) => !inner.matches(row),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

const NULL: Value = Value::Null;

fn column_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

/// Compares two values for equality, treating `1` and `1.0` as equal.
pub fn value_eq(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Total order over JSON values.
///
/// Values of different kinds order as null < bool < number < string <
/// array < object. Numbers compare numerically, integers exactly.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            // serde_json maps iterate in key order, so this is stable.
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// A JSON value usable as an ordered map key.
#[derive(Debug, Clone)]
pub struct RowKey(pub Value);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        value_eq(&self.0, &other.0)
    }
}

impl Eq for RowKey {}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}
