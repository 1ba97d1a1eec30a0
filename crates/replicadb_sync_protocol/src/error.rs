//! Error types for protocol validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised when a producer response breaks the protocol contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A dump page announced more pages without a cursor to fetch them.
    #[error("dump page reported more = true without a next dump state")]
    MissingDumpState,

    /// An entry did not carry a JSON object as its record.
    #[error("entry for collection {collection} is not a JSON object")]
    InvalidRecord {
        /// Collection named by the entry.
        collection: String,
    },
}
