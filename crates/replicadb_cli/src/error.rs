//! CLI error types.

use replicadb_core::SchemaError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file did not hold the expected JSON.
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A sample line was valid JSON but not an object.
    #[error("{}:{line}: expected a JSON object", path.display())]
    NotAnObject {
        /// File path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// The schema or flatten options were rejected.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The requested collection is not in the schema file.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// The schema file holds several collections and none was chosen.
    #[error("the schema file holds {0} collections, pick one with --collection")]
    AmbiguousCollection(usize),

    /// Output could not be serialized.
    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}
