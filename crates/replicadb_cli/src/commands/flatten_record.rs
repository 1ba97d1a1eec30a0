//! Flatten-record command implementation.

use crate::error::{CliError, CliResult};
use replicadb_core::flatten::{FlattenMode, ResolvedSchema};
use replicadb_sync_protocol::Record;
use serde::Serialize;
use std::path::Path;

/// One row of a flattened record.
#[derive(Debug, Serialize)]
pub struct RowOutput {
    /// Collection the row belongs to.
    pub collection: String,
    /// Row content.
    pub row: Record,
}

/// Flattens the record file against the schema file.
///
/// Rows are returned children first, root last.
pub fn flatten_record(
    schema: &Path,
    record: &Path,
    collection: Option<&str>,
    mode: &FlattenMode,
) -> CliResult<Vec<RowOutput>> {
    let schemas = super::load_schemas(schema)?;
    let name = match collection {
        Some(name) => name.to_string(),
        None => match schemas.as_slice() {
            [only] => only.name.clone(),
            many => return Err(CliError::AmbiguousCollection(many.len())),
        },
    };

    let resolved = ResolvedSchema::resolve(schemas, mode)?;
    let target = resolved
        .collection(&name)
        .ok_or_else(|| CliError::UnknownCollection(name.clone()))?;
    let record: Record = super::read_json(record)?;

    Ok(target
        .flatten(&record)
        .into_iter()
        .map(|flat| RowOutput {
            collection: flat.collection_name(&name),
            row: flat.row,
        })
        .collect())
}

/// Runs the flatten-record command.
pub fn run(
    schema: &Path,
    record: &Path,
    collection: Option<&str>,
    mode: &FlattenMode,
) -> CliResult<()> {
    super::print_json(&flatten_record(schema, record, collection, mode)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicadb_testkit::{posts_schema, tagged_schema, users_schema, FixtureDir};
    use serde_json::json;

    #[test]
    fn tags_become_child_rows() {
        let dir = FixtureDir::new();
        let schema = dir.write_json("schema.json", &tagged_schema("root"));
        let record = dir.write_json("record.json", &json!({"id": 1, "tags": ["a", "b"]}));

        let rows = flatten_record(&schema, &record, None, &FlattenMode::Auto).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].collection, "root_tags");
        assert_eq!(rows[0].row["value"], json!("a"));
        assert_eq!(rows[0].row["_fpid"], json!(1));
        assert_eq!(rows[2].collection, "root");
    }

    #[test]
    fn several_collections_need_a_choice() {
        let dir = FixtureDir::new();
        let schema = dir.write_json("schema.json", &vec![users_schema(), posts_schema()]);
        let record = dir.write_json("record.json", &json!({"id": 1, "title": "t"}));

        assert!(matches!(
            flatten_record(&schema, &record, None, &FlattenMode::None),
            Err(CliError::AmbiguousCollection(2))
        ));
        let rows = flatten_record(&schema, &record, Some("posts"), &FlattenMode::None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].collection, "posts");
    }
}
