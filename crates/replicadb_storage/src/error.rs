//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A table with this name already exists.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// The table definition is not usable.
    #[error("invalid table schema for {table}: {message}")]
    InvalidSchema {
        /// Table name.
        table: String,
        /// Description of the problem.
        message: String,
    },

    /// A row did not carry a value for the primary key column.
    #[error("row for table {table} has no value for primary key {column}")]
    MissingPrimaryKey {
        /// Table name.
        table: String,
        /// Primary key column.
        column: String,
    },

    /// An insert collided with an existing primary key.
    #[error("duplicate primary key {key} in table {table}")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Rendered key value.
        key: String,
    },

    /// A row referenced a column the table does not declare.
    #[error("unknown column {column} in table {table}")]
    UnknownColumn {
        /// Table name.
        table: String,
        /// Offending column.
        column: String,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
