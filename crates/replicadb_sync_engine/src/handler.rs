//! Producer handler contracts.
//!
//! A producer is the external system a replica mirrors. Each capability is
//! its own trait so a [`Producer`] states exactly what it supports, and the
//! replica checks that set against its configuration once, at startup.

use crate::scheduler::DeltaSink;
use async_trait::async_trait;
use replicadb_core::{CacheReader, CoreResult, MetadataStore};
use replicadb_sync_protocol::{Cursor, PullDeltaResponse, PullDumpResponse, Record, TriggerReason};
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Result type for handler calls.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// An error raised by a producer handler.
#[derive(Debug, thiserror::Error)]
#[error("{message}{}", .source.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping the underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Input of one dump page request.
#[derive(Debug, Clone)]
pub struct DumpRequest {
    /// Cursor returned by the previous page; `None` on the first page.
    pub previous_dump_state: Option<Cursor>,
    /// Already-applied cache state.
    pub cache: CacheReader,
    /// Every reason served by this dump.
    pub reasons: Vec<TriggerReason>,
}

/// Input of one delta batch request.
#[derive(Debug, Clone)]
pub struct DeltaRequest {
    /// Cursor persisted after the previous delta or dump.
    pub previous_delta_state: Option<Cursor>,
    /// Already-applied cache state.
    pub cache: CacheReader,
    /// Union of the collections named by `reasons`.
    pub affected_collections: BTreeSet<String>,
    /// Every reason served by this delta.
    pub reasons: Vec<TriggerReason>,
}

/// Context handed to a push handler when it is registered.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Already-applied cache state.
    pub cache: CacheReader,
    metadata: MetadataStore,
}

impl PushRequest {
    pub(crate) fn new(cache: CacheReader, metadata: MetadataStore) -> Self {
        Self { cache, metadata }
    }

    /// Cursor persisted by the latest applied delta.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn previous_delta_state(&self) -> CoreResult<Option<Cursor>> {
        self.metadata.delta_state()
    }
}

/// Pulls a full snapshot, one page per call.
#[async_trait]
pub trait DumpHandler: Send + Sync {
    /// Returns the page after `request.previous_dump_state`.
    async fn pull_dump(&self, request: DumpRequest) -> HandlerResult<PullDumpResponse>;
}

/// Pulls changes since a cursor, one batch per call.
#[async_trait]
pub trait DeltaHandler: Send + Sync {
    /// Returns the changes after `request.previous_delta_state`.
    async fn pull_delta(&self, request: DeltaRequest) -> HandlerResult<PullDeltaResponse>;
}

/// Pushes changes to the replica whenever the producer has them.
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Called once at startup; keep `sink` and send batches through it.
    async fn register(&self, request: PushRequest, sink: DeltaSink) -> HandlerResult<()>;
}

/// Creates records in the external system.
#[async_trait]
pub trait CreateHandler: Send + Sync {
    /// Creates one record and returns fields the producer assigned.
    async fn create_record(&self, collection: &str, record: &Record)
        -> HandlerResult<Option<Record>>;
}

/// Updates records in the external system.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Replaces one record with `record`.
    async fn update_record(&self, collection: &str, record: &Record) -> HandlerResult<()>;
}

/// Deletes records in the external system.
#[async_trait]
pub trait DeleteHandler: Send + Sync {
    /// Deletes one record.
    async fn delete_record(&self, collection: &str, record: &Record) -> HandlerResult<()>;
}

/// The capabilities of one producer.
#[derive(Clone, Default)]
pub struct Producer {
    pub(crate) dump: Option<Arc<dyn DumpHandler>>,
    pub(crate) delta: Option<Arc<dyn DeltaHandler>>,
    pub(crate) push: Option<Arc<dyn PushHandler>>,
    pub(crate) create: Option<Arc<dyn CreateHandler>>,
    pub(crate) update: Option<Arc<dyn UpdateHandler>>,
    pub(crate) delete: Option<Arc<dyn DeleteHandler>>,
}

impl Producer {
    /// Creates a producer with no capabilities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dump handler.
    #[must_use]
    pub fn with_dump(mut self, handler: Arc<dyn DumpHandler>) -> Self {
        self.dump = Some(handler);
        self
    }

    /// Sets the delta handler.
    #[must_use]
    pub fn with_delta(mut self, handler: Arc<dyn DeltaHandler>) -> Self {
        self.delta = Some(handler);
        self
    }

    /// Sets the push handler.
    #[must_use]
    pub fn with_push(mut self, handler: Arc<dyn PushHandler>) -> Self {
        self.push = Some(handler);
        self
    }

    /// Sets the create handler.
    #[must_use]
    pub fn with_create(mut self, handler: Arc<dyn CreateHandler>) -> Self {
        self.create = Some(handler);
        self
    }

    /// Sets the update handler.
    #[must_use]
    pub fn with_update(mut self, handler: Arc<dyn UpdateHandler>) -> Self {
        self.update = Some(handler);
        self
    }

    /// Sets the delete handler.
    #[must_use]
    pub fn with_delete(mut self, handler: Arc<dyn DeleteHandler>) -> Self {
        self.delete = Some(handler);
        self
    }

    /// Returns true if the producer can pull dumps.
    pub fn has_dump(&self) -> bool {
        self.dump.is_some()
    }

    /// Returns true if the producer can pull deltas.
    pub fn has_delta(&self) -> bool {
        self.delta.is_some()
    }

    /// Returns true if the producer pushes deltas.
    pub fn has_push(&self) -> bool {
        self.push.is_some()
    }

    /// Returns true if the producer accepts any write.
    pub fn has_write(&self) -> bool {
        self.create.is_some() || self.update.is_some() || self.delete.is_some()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("dump", &self.has_dump())
            .field("delta", &self.has_delta())
            .field("push", &self.has_push())
            .field("create", &self.create.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoDump;

    #[async_trait]
    impl DumpHandler for NoDump {
        async fn pull_dump(&self, _request: DumpRequest) -> HandlerResult<PullDumpResponse> {
            Err(HandlerError::new("unavailable"))
        }
    }

    #[test]
    fn producer_capabilities() {
        let producer = Producer::new().with_dump(Arc::new(NoDump));
        assert!(producer.has_dump());
        assert!(!producer.has_delta());
        assert!(!producer.has_push());
        assert!(!producer.has_write());
        assert!(format!("{producer:?}").contains("dump: true"));
    }

    #[test]
    fn handler_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = HandlerError::with_source("page 2 failed", io);
        assert_eq!(err.message(), "page 2 failed");
        assert_eq!(err.to_string(), "page 2 failed: timed out");
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn handler_error_without_source_shows_message() {
        let err = HandlerError::new("producer offline");
        assert_eq!(err.to_string(), "producer offline");
        assert!(StdError::source(&err).is_none());
    }
}
