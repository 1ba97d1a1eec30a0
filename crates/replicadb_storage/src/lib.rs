//! # ReplicaDB Storage
//!
//! Relational table store interface and implementations for ReplicaDB.
//!
//! This crate provides the lowest-level storage abstraction for ReplicaDB.
//! Table stores hold **generic rows of JSON values** keyed by a primary
//! key column - they do not know about flattening, producers or cursors.
//!
//! ## Design Principles
//!
//! - Stores expose create table, bulk insert, upsert, delete-by-filter
//!   and query; nothing more
//! - Every table declares exactly one primary key column
//! - Must be `Send + Sync`; a single writer runs concurrently with readers
//! - ReplicaDB owns all interpretation of the stored rows
//!
//! ## Available Stores
//!
//! - [`InMemoryTableStore`] - For testing and ephemeral caches
//!
//! ## Example
//!
//! ```rust
//! use replicadb_storage::{row_from, ColumnDef, ColumnType, Filter, InMemoryTableStore, TableSchema, TableStore};
//! use serde_json::json;
//!
//! let store = InMemoryTableStore::new();
//! store
//!     .create_table(TableSchema::new(
//!         "tags",
//!         vec![ColumnDef::new("_fid", ColumnType::String).primary_key()],
//!     ))
//!     .unwrap();
//! store.upsert("tags", vec![row_from(json!({"_fid": "1.tags.0"}))]).unwrap();
//! assert_eq!(store.delete("tags", &Filter::starts_with("_fid", "1.")).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod filter;
mod memory;

pub use backend::{
    BatchStats, ColumnDef, ColumnType, Query, Row, TableOp, TableSchema, TableStore,
};
pub use error::{StorageError, StorageResult};
pub use filter::{compare_values, value_eq, Filter, RowKey};
pub use memory::{row_from, InMemoryTableStore};
