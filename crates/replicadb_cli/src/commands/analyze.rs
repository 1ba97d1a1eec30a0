//! Analyze command implementation.

use crate::error::{CliError, CliResult};
use replicadb_core::schema::CollectionSchema;
use replicadb_core::SchemaAnalyzer;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Infers the schema of `collection` from a JSON-lines sample file.
///
/// Blank lines are skipped.
pub fn analyze(samples: &Path, collection: &str) -> CliResult<CollectionSchema> {
    let text = std::fs::read_to_string(samples).map_err(|source| CliError::Read {
        path: samples.to_path_buf(),
        source,
    })?;

    let mut analyzer = SchemaAnalyzer::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|source| CliError::Json {
            path: samples.to_path_buf(),
            source,
        })?;
        let Value::Object(record) = value else {
            return Err(CliError::NotAnObject {
                path: samples.to_path_buf(),
                line: index + 1,
            });
        };
        analyzer.observe(collection, &record);
    }
    debug!(samples = analyzer.samples(), "samples read");

    let schema = analyzer
        .finish()?
        .into_iter()
        .next()
        .ok_or_else(|| CliError::UnknownCollection(collection.to_string()))?;
    info!(collection, fields = schema.fields.len(), "schema inferred");
    Ok(schema)
}

/// Runs the analyze command.
pub fn run(samples: &Path, collection: &str) -> CliResult<()> {
    super::print_json(&analyze(samples, collection)?)
}
