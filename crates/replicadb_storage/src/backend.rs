//! Table store trait definition.

use crate::error::{StorageError, StorageResult};
use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 text.
    String,
    /// Floating point number.
    Number,
    /// Whole number.
    Integer,
    /// Boolean.
    Boolean,
    /// Timestamp (ISO-8601 text).
    Date,
    /// Calendar date without time.
    Dateonly,
    /// Opaque binary payload.
    Binary,
    /// One of a closed set of strings.
    Enum,
    /// Arbitrary nested JSON.
    Json,
}

/// Definition of one column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Whether values must be unique.
    pub unique: bool,
}

impl ColumnDef {
    /// Creates a plain column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            unique: false,
        }
    }

    /// Marks the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self
    }

    /// Marks the column as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Definition of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a table definition.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Returns the primary key column.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly one column is marked primary key.
    pub fn primary_key(&self) -> StorageResult<&ColumnDef> {
        let mut keys = self.columns.iter().filter(|c| c.primary_key);
        match (keys.next(), keys.next()) {
            (Some(column), None) => Ok(column),
            (None, _) => Err(StorageError::InvalidSchema {
                table: self.name.clone(),
                message: "no primary key column".into(),
            }),
            (Some(_), Some(_)) => Err(StorageError::InvalidSchema {
                table: self.name.clone(),
                message: "more than one primary key column".into(),
            }),
        }
    }

    /// Returns the column with the given name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A read request against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Row filter.
    pub filter: Filter,
    /// Columns to return; `None` returns every column.
    pub projection: Option<Vec<String>>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates a query returning all rows matching `filter`.
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            projection: None,
            limit: None,
        }
    }

    /// Creates a query returning every row.
    #[must_use]
    pub fn all() -> Self {
        Self::new(Filter::All)
    }

    /// Restricts the returned columns.
    #[must_use]
    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

/// One write of a [`TableStore::apply_batch`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOp {
    /// Removes every row of a table.
    Truncate(String),
    /// Inserts rows, replacing any row with the same primary key.
    Upsert {
        /// Target table.
        table: String,
        /// Rows to write.
        rows: Vec<Row>,
    },
    /// Deletes rows matching a filter.
    Delete {
        /// Target table.
        table: String,
        /// Rows to remove.
        filter: Filter,
    },
}

impl TableOp {
    /// Table the operation writes.
    pub fn table(&self) -> &str {
        match self {
            TableOp::Truncate(table)
            | TableOp::Upsert { table, .. }
            | TableOp::Delete { table, .. } => table,
        }
    }
}

/// Rows touched by one [`TableStore::apply_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Rows written by upserts.
    pub rows_written: u64,
    /// Rows removed by deletes; truncations are not counted.
    pub rows_deleted: u64,
}

/// A relational table store used as the physical cache.
///
/// Stores are **generic tables of JSON rows**. They know about table names,
/// primary keys and filters, nothing about flattening, cursors or producers.
/// ReplicaDB owns all interpretation of the rows it writes.
///
/// # Invariants
///
/// - Every table has exactly one primary key column
/// - `insert` fails on a duplicate key, `upsert` replaces the stored row
/// - Each call applies atomically: concurrent readers observe the table
///   either before or after the call, never in between
/// - `apply_batch` extends this to several tables: a batch is observed
///   whole or not at all
/// - Stores must be `Send + Sync`; writes come from a single writer but
///   reads may run concurrently with it
///
/// # Implementors
///
/// - [`super::InMemoryTableStore`] - For testing and ephemeral caches
pub trait TableStore: Send + Sync {
    /// Creates a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table already exists or the schema does not
    /// declare exactly one primary key.
    fn create_table(&self, schema: TableSchema) -> StorageResult<()>;

    /// Drops a table. Returns `false` when it did not exist.
    fn drop_table(&self, name: &str) -> StorageResult<bool>;

    /// Returns the definition of a table, if it exists.
    fn table_schema(&self, name: &str) -> StorageResult<Option<TableSchema>>;

    /// Lists table names in ascending order.
    fn table_names(&self) -> StorageResult<Vec<String>>;

    /// Removes every row of a table.
    fn truncate(&self, name: &str) -> StorageResult<()>;

    /// Inserts rows; all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if any row lacks a primary key, collides with an
    /// existing key or carries an undeclared column.
    fn insert(&self, name: &str, rows: Vec<Row>) -> StorageResult<()>;

    /// Inserts rows, replacing any row with the same primary key.
    fn upsert(&self, name: &str, rows: Vec<Row>) -> StorageResult<()>;

    /// Deletes rows matching `filter` and returns how many were removed.
    fn delete(&self, name: &str, filter: &Filter) -> StorageResult<u64>;

    /// Applies `ops` in order as one atomic write.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing written, if a table is missing or an
    /// upserted row lacks a primary key or carries an undeclared column.
    fn apply_batch(&self, ops: Vec<TableOp>) -> StorageResult<BatchStats>;

    /// Returns rows matching the query, ordered by primary key.
    fn query(&self, name: &str, query: &Query) -> StorageResult<Vec<Row>>;

    /// Counts rows matching `filter`.
    fn count(&self, name: &str, filter: &Filter) -> StorageResult<u64> {
        let rows = self.query(name, &Query::new(filter.clone()))?;
        Ok(rows.len() as u64)
    }

    /// Returns true if the table exists.
    fn has_table(&self, name: &str) -> StorageResult<bool> {
        Ok(self.table_schema(name)?.is_some())
    }
}
