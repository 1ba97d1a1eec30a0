//! Read-only view over cached collections.

use crate::error::{CoreError, CoreResult};
use replicadb_storage::{compare_values, Filter, Query, RowKey, TableStore};
use replicadb_sync_protocol::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOperation {
    /// Number of rows, or of non-null values when a field is given.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Mean of numeric values.
    Avg,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
}

/// An aggregation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Function to apply.
    pub operation: AggregateOperation,
    /// Field to aggregate; `Count` may omit it.
    #[serde(default)]
    pub field: Option<String>,
    /// Fields to group by.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Aggregation {
    /// Counts rows.
    #[must_use]
    pub fn count() -> Self {
        Self {
            operation: AggregateOperation::Count,
            field: None,
            groups: Vec::new(),
        }
    }

    /// Applies `operation` to `field`.
    #[must_use]
    pub fn of(operation: AggregateOperation, field: impl Into<String>) -> Self {
        Self {
            operation,
            field: Some(field.into()),
            groups: Vec::new(),
        }
    }

    /// Adds a group-by field.
    #[must_use]
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.groups.push(field.into());
        self
    }
}

/// One aggregate value with the group it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Aggregated value; `null` when no value contributed.
    pub value: Value,
    /// Group-by field values.
    pub group: Record,
}

/// Read-only access to every table of a cache.
///
/// Handlers receive one so they can consult already-applied state.
#[derive(Clone)]
pub struct CacheReader {
    store: Arc<dyn TableStore>,
}

impl CacheReader {
    /// Creates a reader over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Returns a reader for one collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if no such table exists.
    pub fn collection(&self, name: &str) -> CoreResult<CollectionReader> {
        if !self.store.has_table(name)? {
            return Err(CoreError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        Ok(CollectionReader {
            store: self.store.clone(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader").finish_non_exhaustive()
    }
}

/// Read-only access to one cached collection.
#[derive(Clone)]
pub struct CollectionReader {
    store: Arc<dyn TableStore>,
    name: String,
}

impl CollectionReader {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lists rows matching `filter`, optionally projected.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list(&self, filter: &Filter, projection: Option<&[&str]>) -> CoreResult<Vec<Record>> {
        let mut query = Query::new(filter.clone());
        if let Some(columns) = projection {
            query = query.with_projection(columns.iter().copied());
        }
        Ok(self.store.query(&self.name, &query)?)
    }

    /// Aggregates rows matching `filter`.
    ///
    /// Groups are sorted by value, largest first, then truncated to `limit`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn aggregate(
        &self,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> CoreResult<Vec<AggregateResult>> {
        let rows = self.store.query(&self.name, &Query::new(filter.clone()))?;

        let mut groups: BTreeMap<Vec<RowKey>, Vec<&Record>> = BTreeMap::new();
        for row in &rows {
            let key = aggregation
                .groups
                .iter()
                .map(|g| RowKey(row.get(g).cloned().unwrap_or(Value::Null)))
                .collect();
            groups.entry(key).or_default().push(row);
        }
        if groups.is_empty() && aggregation.groups.is_empty() {
            groups.insert(Vec::new(), Vec::new());
        }

        let mut results: Vec<AggregateResult> = groups
            .into_iter()
            .map(|(key, rows)| AggregateResult {
                value: compute(aggregation, &rows),
                group: aggregation
                    .groups
                    .iter()
                    .cloned()
                    .zip(key.into_iter().map(|k| k.0))
                    .collect::<Map<_, _>>(),
            })
            .collect();

        results.sort_by(|a, b| compare_values(&b.value, &a.value));
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }
}

impl std::fmt::Debug for CollectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionReader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn compute(aggregation: &Aggregation, rows: &[&Record]) -> Value {
    let values: Vec<&Value> = match &aggregation.field {
        Some(field) => rows
            .iter()
            .filter_map(|r| r.get(field))
            .filter(|v| !v.is_null())
            .collect(),
        None => Vec::new(),
    };

    match aggregation.operation {
        AggregateOperation::Count => match aggregation.field {
            Some(_) => Value::from(values.len()),
            None => Value::from(rows.len()),
        },
        AggregateOperation::Sum => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else if let Some(total) = checked_sum(&values) {
                Value::from(total)
            } else {
                float(numbers.iter().sum())
            }
        }
        AggregateOperation::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateOperation::Min => values
            .into_iter()
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateOperation::Max => values
            .into_iter()
            .max_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Integer sum, or `None` when a value is not an integer or the sum overflows.
fn checked_sum(values: &[&Value]) -> Option<i64> {
    values
        .iter()
        .try_fold(0i64, |total, v| total.checked_add(v.as_i64()?))
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}
