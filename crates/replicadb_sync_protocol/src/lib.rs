//! # ReplicaDB Sync Protocol
//!
//! Producer-facing protocol types for ReplicaDB.
//!
//! This crate provides:
//! - `Entry` for `(collection, record)` pairs
//! - `PullDumpResponse` / `PullDeltaResponse` page types
//! - `DeltaBatch` for pushed or pulled change sets
//! - `TriggerReason` describing why a sync was requested
//!
//! Cursors are opaque JSON values defined by each producer.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entry;
mod error;
mod messages;
mod reason;

pub use entry::{Cursor, Entry, Record};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{DeltaBatch, PullDeltaResponse, PullDumpResponse};
pub use reason::{ReasonKind, TriggerReason};
