//! Flatten-schema command implementation.

use crate::error::CliResult;
use replicadb_core::flatten::{FlatCollection, FlattenMode, ResolvedSchema};
use std::path::Path;
use tracing::info;

/// Resolves the schema file under `mode` and returns every flat collection.
pub fn flatten_schema(schema: &Path, mode: &FlattenMode) -> CliResult<Vec<FlatCollection>> {
    let resolved = ResolvedSchema::resolve(super::load_schemas(schema)?, mode)?;
    let flat: Vec<FlatCollection> = resolved.flat_collections().cloned().collect();
    info!(
        roots = resolved.collections().count(),
        collections = flat.len(),
        "schema flattened"
    );
    Ok(flat)
}

/// Runs the flatten-schema command.
pub fn run(schema: &Path, mode: &FlattenMode) -> CliResult<()> {
    super::print_json(&flatten_schema(schema, mode)?)
}
