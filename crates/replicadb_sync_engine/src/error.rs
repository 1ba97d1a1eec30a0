//! Error types for the sync engine.

use crate::handler::HandlerError;
use replicadb_core::{CoreError, SchemaError};
use replicadb_storage::StorageError;
use replicadb_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The schema or flatten configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(#[from] SchemaError),

    /// The replica configuration does not match the producer.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A cron pattern could not be parsed.
    #[error("invalid cron pattern {pattern:?}: {message}")]
    InvalidSchedule {
        /// Pattern as configured.
        pattern: String,
        /// Parser message.
        message: String,
    },

    /// Cache or metadata error.
    #[error("cache error: {0}")]
    Core(#[from] CoreError),

    /// Storage error outside the cache target.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed producer data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A producer handler failed.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// The producer does not implement the requested write.
    #[error("{operation} is not supported for collection {collection}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Collection name.
        collection: String,
    },

    /// The schema has not been discovered yet.
    #[error("schema not available yet")]
    SchemaUnavailable,

    /// The scheduler was shut down.
    #[error("scheduler shut down")]
    Shutdown,
}

impl SyncError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true if this error can be retried.
    ///
    /// The engine itself never retries; the next trigger does.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Handler(_) => true,
            SyncError::Storage(_) => true,
            SyncError::Core(CoreError::Storage(_)) => true,
            _ => false,
        }
    }

    /// Returns true for errors raised while starting a replica.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration(_)
                | SyncError::InvalidConfig(_)
                | SyncError::InvalidSchedule { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Handler(HandlerError::new("rate limited")).is_retryable());
        assert!(SyncError::Storage(StorageError::TableNotFound("t".into())).is_retryable());
        assert!(!SyncError::Shutdown.is_retryable());
        assert!(!SyncError::SchemaUnavailable.is_retryable());
    }

    #[test]
    fn configuration_errors() {
        let err = SyncError::from(SchemaError::MissingPrimaryKey {
            collection: "users".into(),
        });
        assert!(err.is_configuration());
        assert!(SyncError::invalid_config("no handlers").is_configuration());
        assert!(!SyncError::Shutdown.is_configuration());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Unsupported {
            operation: "create",
            collection: "users".into(),
        };
        assert_eq!(err.to_string(), "create is not supported for collection users");
        assert_eq!(SyncError::Shutdown.to_string(), "scheduler shut down");
    }
}
