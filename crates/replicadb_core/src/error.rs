//! Error types for ReplicaDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Configuration errors detected while resolving schemas and flatten options.
///
/// These are fatal at startup: a replica with an invalid configuration
/// never begins syncing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A top-level collection has no primary key.
    #[error("collection {collection} has no primary key")]
    MissingPrimaryKey {
        /// Collection name.
        collection: String,
    },

    /// A top-level collection declares more than one primary key.
    #[error("collection {collection} declares more than one primary key")]
    MultiplePrimaryKeys {
        /// Collection name.
        collection: String,
    },

    /// The primary key field is not a leaf.
    #[error("primary key {field} of collection {collection} is not a leaf field")]
    InvalidPrimaryKey {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
    },

    /// Configuration references a collection absent from the schema.
    #[error("unknown collection: {collection}")]
    UnknownCollection {
        /// Collection name.
        collection: String,
    },

    /// Configuration references a path absent from the schema.
    #[error("unknown path {path} in collection {collection}")]
    UnknownPath {
        /// Collection name.
        collection: String,
        /// Dotted path.
        path: String,
    },

    /// A path crosses an array that is not itself promoted to a model.
    #[error("path {path} in collection {collection} crosses an array that is not promoted")]
    PathThroughArray {
        /// Collection name.
        collection: String,
        /// Dotted path.
        path: String,
    },

    /// A promoted model points at a leaf field.
    #[error("path {path} in collection {collection} is a leaf and cannot become a model")]
    LeafModel {
        /// Collection name.
        collection: String,
        /// Dotted path.
        path: String,
    },

    /// A field name contains the path separator or the escape marker.
    #[error("invalid field name {name} in collection {collection}")]
    InvalidFieldName {
        /// Collection name.
        collection: String,
        /// Offending name.
        name: String,
    },

    /// Two collections (root or derived) resolve to the same name.
    #[error("collection name collision: {name}")]
    NameCollision {
        /// Colliding name.
        name: String,
    },
}

/// Errors that can occur in ReplicaDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] replicadb_storage::StorageError),

    /// Configuration error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] replicadb_sync_protocol::ProtocolError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A collection is not part of the cache.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// A persisted metadata value could not be interpreted.
    #[error("corrupted metadata for key {key}: {message}")]
    CorruptedMetadata {
        /// Metadata key.
        key: String,
        /// Description of the problem.
        message: String,
    },
}
