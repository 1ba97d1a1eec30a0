//! # ReplicaDB Core
//!
//! Schema handling and cache application for ReplicaDB.
//!
//! This crate turns nested producer records into flat relational rows and
//! writes them into a [`TableStore`](replicadb_storage::TableStore):
//!
//! - [`schema`]: field trees and collection schemas
//! - [`flatten`]: record and schema flattening, flatten option resolution
//! - [`SchemaAnalyzer`]: schema inference from sample records
//! - [`CacheTarget`]: dump and delta application
//! - [`CacheReader`]: read-only access for handlers and readers
//! - [`MetadataStore`] / [`PendingOperationLog`]: persisted sync state
//! - [`RelationGraph`]: relations derived from references
//!
//! ## Example
//!
//! ```rust
//! use replicadb_core::flatten::{FlattenMode, ResolvedSchema};
//! use replicadb_core::schema::{CollectionSchema, Field, FieldMap, LeafField};
//! use replicadb_storage::ColumnType;
//! use serde_json::json;
//!
//! let users = CollectionSchema::new("users", FieldMap::new())
//!     .with_field("id", LeafField::new(ColumnType::Integer).primary_key())
//!     .with_field("tags", Field::array(Field::leaf(ColumnType::String)));
//! let schema = ResolvedSchema::resolve(vec![users], &FlattenMode::Auto).unwrap();
//!
//! let record = json!({"id": 1, "tags": ["a", "b"]});
//! let rows = schema.collection("users").unwrap().flatten(record.as_object().unwrap());
//! assert_eq!(rows.len(), 3);
//! assert_eq!(rows[0].collection_name("users"), "users_tags");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod analyzer;
mod cache;
mod error;
pub mod flatten;
mod metadata;
pub mod path;
mod relations;
pub mod schema;

pub use analyzer::{SchemaAnalyzer, DISCOVERED_PRIMARY_KEY};
pub use cache::{
    AggregateOperation, AggregateResult, Aggregation, ApplyStats, CacheReader, CacheTarget,
    CollectionReader,
};
pub use error::{CoreError, CoreResult, SchemaError};
pub use metadata::{
    MetadataStore, PendingOperation, PendingOperationLog, StartupState, DELTA_STATE_KEY,
    DUMP_STATE_KEY, FLAT_SCHEMA_KEY, METADATA_TABLE, PENDING_OPERATIONS_TABLE, SCHEMA_KEY,
    STARTUP_STATE_KEY,
};
pub use relations::{Relation, RelationGraph, RelationKind};
