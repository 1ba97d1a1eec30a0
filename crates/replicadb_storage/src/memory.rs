//! In-memory table store for testing.

use crate::backend::{BatchStats, Query, Row, TableOp, TableSchema, TableStore};
use crate::error::{StorageError, StorageResult};
use crate::filter::{Filter, RowKey};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    primary_key: String,
    rows: BTreeMap<RowKey, Row>,
}

impl Table {
    fn new(schema: TableSchema) -> StorageResult<Self> {
        let primary_key = schema.primary_key()?.name.clone();
        Ok(Self {
            schema,
            primary_key,
            rows: BTreeMap::new(),
        })
    }

    fn key_of(&self, row: &Row) -> StorageResult<RowKey> {
        match row.get(&self.primary_key) {
            Some(value) if !value.is_null() => Ok(RowKey(value.clone())),
            _ => Err(StorageError::MissingPrimaryKey {
                table: self.schema.name.clone(),
                column: self.primary_key.clone(),
            }),
        }
    }

    fn check_columns(&self, row: &Row) -> StorageResult<()> {
        for column in row.keys() {
            if self.schema.column(column).is_none() {
                return Err(StorageError::UnknownColumn {
                    table: self.schema.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

/// An in-memory table store.
///
/// This store keeps every table in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that are rebuilt by a dump on every start
///
/// # Thread Safety
///
/// Every call takes the store lock once, so a batch written by a single
/// call is never observed half-applied.
///
/// # Example
///
/// ```rust
/// use replicadb_storage::{ColumnDef, ColumnType, InMemoryTableStore, Query, TableSchema, TableStore};
/// use serde_json::json;
///
/// let store = InMemoryTableStore::new();
/// store
///     .create_table(TableSchema::new(
///         "users",
///         vec![ColumnDef::new("id", ColumnType::Integer).primary_key()],
///     ))
///     .unwrap();
/// store
///     .insert("users", vec![json!({"id": 1}).as_object().unwrap().clone()])
///     .unwrap();
/// assert_eq!(store.query("users", &Query::all()).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryTableStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows across all tables.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.tables.read().values().map(|t| t.rows.len()).sum()
    }
}

/// A batch operation that passed validation.
enum Staged {
    Truncate(String),
    Upsert(String, Vec<(RowKey, Row)>),
    Delete(String, Filter),
}

fn project(row: &Row, projection: Option<&Vec<String>>) -> Row {
    match projection {
        None => row.clone(),
        Some(columns) => columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect(),
    }
}

impl TableStore for InMemoryTableStore {
    fn create_table(&self, schema: TableSchema) -> StorageResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(StorageError::TableExists(schema.name));
        }
        let name = schema.name.clone();
        tables.insert(name, Table::new(schema)?);
        Ok(())
    }

    fn drop_table(&self, name: &str) -> StorageResult<bool> {
        Ok(self.tables.write().remove(name).is_some())
    }

    fn table_schema(&self, name: &str) -> StorageResult<Option<TableSchema>> {
        Ok(self.tables.read().get(name).map(|t| t.schema.clone()))
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    fn truncate(&self, name: &str) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        table.rows.clear();
        Ok(())
    }

    fn insert(&self, name: &str, rows: Vec<Row>) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        // Validate the whole batch before touching the table.
        let mut staged = BTreeMap::new();
        for row in rows {
            table.check_columns(&row)?;
            let key = table.key_of(&row)?;
            if table.rows.contains_key(&key) || staged.contains_key(&key) {
                return Err(StorageError::DuplicateKey {
                    table: name.to_string(),
                    key: key.0.to_string(),
                });
            }
            staged.insert(key, row);
        }

        table.rows.append(&mut staged);
        Ok(())
    }

    fn upsert(&self, name: &str, rows: Vec<Row>) -> StorageResult<()> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            table.check_columns(&row)?;
            keyed.push((table.key_of(&row)?, row));
        }

        for (key, row) in keyed {
            table.rows.insert(key, row);
        }
        Ok(())
    }

    fn delete(&self, name: &str, filter: &Filter) -> StorageResult<u64> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        let before = table.rows.len();
        table.rows.retain(|_, row| !filter.matches(row));
        Ok((before - table.rows.len()) as u64)
    }

    fn apply_batch(&self, ops: Vec<TableOp>) -> StorageResult<BatchStats> {
        let mut tables = self.tables.write();

        // Validate the whole batch before touching any table.
        let mut staged = Vec::with_capacity(ops.len());
        for op in ops {
            let table = tables
                .get(op.table())
                .ok_or_else(|| StorageError::TableNotFound(op.table().to_string()))?;
            staged.push(match op {
                TableOp::Truncate(name) => Staged::Truncate(name),
                TableOp::Delete { table: name, filter } => Staged::Delete(name, filter),
                TableOp::Upsert { table: name, rows } => {
                    let mut keyed = Vec::with_capacity(rows.len());
                    for row in rows {
                        table.check_columns(&row)?;
                        keyed.push((table.key_of(&row)?, row));
                    }
                    Staged::Upsert(name, keyed)
                }
            });
        }

        let mut stats = BatchStats::default();
        for op in staged {
            match op {
                Staged::Truncate(name) => {
                    if let Some(table) = tables.get_mut(&name) {
                        table.rows.clear();
                    }
                }
                Staged::Delete(name, filter) => {
                    if let Some(table) = tables.get_mut(&name) {
                        let before = table.rows.len();
                        table.rows.retain(|_, row| !filter.matches(row));
                        stats.rows_deleted += (before - table.rows.len()) as u64;
                    }
                }
                Staged::Upsert(name, keyed) => {
                    if let Some(table) = tables.get_mut(&name) {
                        stats.rows_written += keyed.len() as u64;
                        table.rows.extend(keyed);
                    }
                }
            }
        }
        Ok(stats)
    }

    fn query(&self, name: &str, query: &Query) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(table
            .rows
            .values()
            .filter(|row| query.filter.matches(row))
            .take(limit)
            .map(|row| project(row, query.projection.as_ref()))
            .collect())
    }

    fn count(&self, name: &str, filter: &Filter) -> StorageResult<u64> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        Ok(table.rows.values().filter(|row| filter.matches(row)).count() as u64)
    }
}

/// Convenience for building rows in tests and fixtures.
///
/// Non-object values produce an empty row.
pub fn row_from(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}
