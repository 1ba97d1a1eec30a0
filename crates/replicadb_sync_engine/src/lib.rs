//! # ReplicaDB Sync Engine
//!
//! Keeps a local cache in step with a producer.
//!
//! This crate provides:
//! - [`Producer`]: the handlers a producer implements (dump, delta, push, writes)
//! - [`SyncScheduler`]: a single-flight job queue with debouncing and cron schedules
//! - [`Replica`]: startup, schema discovery, reads and write-through
//! - [`MockProducer`]: a scripted producer for tests
//!
//! ## Architecture
//!
//! A replica starts by reconciling its cache with the known schema, or by
//! discovering one from the first data it receives. Dumps are paginated and
//! resumable; deltas follow a cursor persisted after every applied batch.
//! All jobs run on one worker, so the cache has a single writer.
//!
//! ## Key Invariants
//!
//! - At most one job runs at a time; push > dump > delta when several wait
//! - Requests queued while a job of the same kind waits share its result
//! - A cursor is persisted only after the data it follows has been applied
//! - Writes reach the producer before they reach the cache
//! - Handler failures are recorded and reported, never retried in a loop

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod discovery;
mod error;
mod handler;
mod mock;
mod replica;
mod scheduler;
mod write;

pub use config::{parse_schedule, ReplicaConfig};
pub use error::{SyncError, SyncResult};
pub use handler::{
    CreateHandler, DeleteHandler, DeltaHandler, DeltaRequest, DumpHandler, DumpRequest,
    HandlerError, HandlerResult, Producer, PushHandler, PushRequest, UpdateHandler,
};
pub use mock::{MockProducer, WriteCall};
pub use replica::{Replica, ReplicaCollection};
pub use scheduler::{DeltaSink, JobKind, SyncCycleResult, SyncScheduler, SyncStats, SyncTicket};
