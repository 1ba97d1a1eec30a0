//! Records and entries exchanged with producers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as produced by the external system: a JSON object.
pub type Record = Map<String, Value>;

/// An opaque, producer-defined cursor.
///
/// The core never inspects cursors; it persists them and hands them back
/// on the next call.
pub type Cursor = Value;

/// A `(collection, record)` pair.
///
/// For new or updated entries the record is the full record. For deleted
/// entries it is a "predicate record": the subset of columns (usually the
/// primary key) identifying the rows to delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Name of the collection the record belongs to.
    pub collection: String,
    /// The record.
    pub record: Record,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub fn new(collection: impl Into<String>, record: Record) -> Self {
        Self {
            collection: collection.into(),
            record,
        }
    }

    /// Creates an entry from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRecord`] when `value` is not an object.
    pub fn from_value(collection: impl Into<String>, value: Value) -> ProtocolResult<Self> {
        let collection = collection.into();
        match value {
            Value::Object(record) => Ok(Self { collection, record }),
            _ => Err(ProtocolError::InvalidRecord { collection }),
        }
    }
}
