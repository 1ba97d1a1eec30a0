//! A scripted producer for tests.

use crate::handler::{
    CreateHandler, DeleteHandler, DeltaHandler, DeltaRequest, DumpHandler, DumpRequest,
    HandlerError, HandlerResult, Producer, PushHandler, PushRequest, UpdateHandler,
};
use crate::scheduler::DeltaSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use replicadb_sync_protocol::{PullDeltaResponse, PullDumpResponse, Record};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A write received by a [`MockProducer`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCall {
    /// `create_record` call.
    Create {
        /// Collection name.
        collection: String,
        /// Record as sent.
        record: Record,
    },
    /// `update_record` call.
    Update {
        /// Collection name.
        collection: String,
        /// Record as sent.
        record: Record,
    },
    /// `delete_record` call.
    Delete {
        /// Collection name.
        collection: String,
        /// Record as sent.
        record: Record,
    },
}

/// A producer answering from scripted queues and recording every call.
///
/// When a queue runs dry, dumps return an empty final page and deltas an
/// empty batch that keeps the cursor where it is. Created records without
/// an `id` get a sequential one.
#[derive(Default)]
pub struct MockProducer {
    dump_pages: Mutex<VecDeque<HandlerResult<PullDumpResponse>>>,
    delta_batches: Mutex<VecDeque<HandlerResult<PullDeltaResponse>>>,
    dump_requests: Mutex<Vec<DumpRequest>>,
    delta_requests: Mutex<Vec<DeltaRequest>>,
    writes: Mutex<Vec<WriteCall>>,
    failing_writes: Mutex<Option<String>>,
    sink: Mutex<Option<DeltaSink>>,
    next_id: AtomicI64,
}

impl MockProducer {
    /// Creates a mock with empty queues.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        })
    }

    /// A producer with the mock's dump and delta handlers.
    pub fn producer(self: &Arc<Self>) -> Producer {
        Producer::new()
            .with_dump(self.clone())
            .with_delta(self.clone())
    }

    /// A producer with every handler of the mock.
    pub fn full_producer(self: &Arc<Self>) -> Producer {
        self.producer()
            .with_push(self.clone())
            .with_create(self.clone())
            .with_update(self.clone())
            .with_delete(self.clone())
    }

    /// Queues a dump page.
    pub fn push_dump_page(&self, page: PullDumpResponse) {
        self.dump_pages.lock().push_back(Ok(page));
    }

    /// Makes the next dump call fail.
    pub fn fail_next_dump(&self, message: &str) {
        self.dump_pages
            .lock()
            .push_back(Err(HandlerError::new(message)));
    }

    /// Queues a delta batch.
    pub fn push_delta(&self, batch: PullDeltaResponse) {
        self.delta_batches.lock().push_back(Ok(batch));
    }

    /// Makes the next delta call fail.
    pub fn fail_next_delta(&self, message: &str) {
        self.delta_batches
            .lock()
            .push_back(Err(HandlerError::new(message)));
    }

    /// Makes every write fail with `message`.
    pub fn fail_writes(&self, message: &str) {
        *self.failing_writes.lock() = Some(message.to_string());
    }

    /// Dump requests received so far.
    pub fn dump_requests(&self) -> Vec<DumpRequest> {
        self.dump_requests.lock().clone()
    }

    /// Delta requests received so far.
    pub fn delta_requests(&self) -> Vec<DeltaRequest> {
        self.delta_requests.lock().clone()
    }

    /// Writes received so far.
    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().clone()
    }

    /// Sink handed over at push registration.
    pub fn sink(&self) -> Option<DeltaSink> {
        self.sink.lock().clone()
    }

    fn record_write(&self, call: WriteCall) -> HandlerResult<()> {
        if let Some(message) = self.failing_writes.lock().as_deref() {
            return Err(HandlerError::new(message));
        }
        self.writes.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl DumpHandler for MockProducer {
    async fn pull_dump(&self, request: DumpRequest) -> HandlerResult<PullDumpResponse> {
        self.dump_requests.lock().push(request);
        self.dump_pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullDumpResponse::done(Vec::new(), None)))
    }
}

#[async_trait]
impl DeltaHandler for MockProducer {
    async fn pull_delta(&self, request: DeltaRequest) -> HandlerResult<PullDeltaResponse> {
        let cursor = request.previous_delta_state.clone().unwrap_or(Value::Null);
        self.delta_requests.lock().push(request);
        self.delta_batches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullDeltaResponse::unchanged(cursor)))
    }
}

#[async_trait]
impl PushHandler for MockProducer {
    async fn register(&self, _request: PushRequest, sink: DeltaSink) -> HandlerResult<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }
}

#[async_trait]
impl CreateHandler for MockProducer {
    async fn create_record(
        &self,
        collection: &str,
        record: &Record,
    ) -> HandlerResult<Option<Record>> {
        self.record_write(WriteCall::Create {
            collection: collection.to_string(),
            record: record.clone(),
        })?;
        if record.contains_key("id") {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut assigned = Record::new();
        assigned.insert("id".to_string(), json!(id));
        Ok(Some(assigned))
    }
}

#[async_trait]
impl UpdateHandler for MockProducer {
    async fn update_record(&self, collection: &str, record: &Record) -> HandlerResult<()> {
        self.record_write(WriteCall::Update {
            collection: collection.to_string(),
            record: record.clone(),
        })
    }
}

#[async_trait]
impl DeleteHandler for MockProducer {
    async fn delete_record(&self, collection: &str, record: &Record) -> HandlerResult<()> {
        self.record_write(WriteCall::Delete {
            collection: collection.to_string(),
            record: record.clone(),
        })
    }
}
