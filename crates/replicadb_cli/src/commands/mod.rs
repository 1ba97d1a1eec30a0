//! CLI command implementations.

pub mod analyze;
pub mod flatten_record;
pub mod flatten_schema;

use crate::error::{CliError, CliResult};
use replicadb_core::flatten::{FlattenMode, ManualFlattenOptions};
use replicadb_core::schema::CollectionSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Reads and parses a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    One(CollectionSchema),
    Many(Vec<CollectionSchema>),
}

/// Loads a schema file holding one collection schema or an array of them.
pub fn load_schemas(path: &Path) -> CliResult<Vec<CollectionSchema>> {
    Ok(match read_json(path)? {
        SchemaFile::One(schema) => vec![schema],
        SchemaFile::Many(schemas) => schemas,
    })
}

/// Chooses the flatten mode from the command-line flags.
///
/// The options file maps collection names to `{asModels, asFields}`.
pub fn flatten_mode(options: Option<&Path>, auto: bool) -> CliResult<FlattenMode> {
    match options {
        Some(path) => {
            let options: BTreeMap<String, ManualFlattenOptions> = read_json(path)?;
            Ok(FlattenMode::Manual(options))
        }
        None if auto => Ok(FlattenMode::Auto),
        None => Ok(FlattenMode::None),
    }
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicadb_testkit::{tagged_schema, users_schema, FixtureDir};
    use serde_json::json;

    #[test]
    fn schema_file_may_hold_one_or_many() {
        let dir = FixtureDir::new();
        let one = dir.write_json("one.json", &users_schema());
        let many = dir.write_json("many.json", &vec![users_schema(), tagged_schema("root")]);

        assert_eq!(load_schemas(&one).unwrap().len(), 1);
        assert_eq!(load_schemas(&many).unwrap().len(), 2);
    }

    #[test]
    fn options_file_selects_manual_mode() {
        let dir = FixtureDir::new();
        let path = dir.write_json(
            "options.json",
            &json!({"users": {"asModels": ["tags"], "asFields": ["address"]}}),
        );

        match flatten_mode(Some(&path), false).unwrap() {
            FlattenMode::Manual(options) => {
                assert_eq!(options["users"].as_models, vec!["tags".to_string()]);
            }
            other => panic!("unexpected mode {other:?}"),
        }
        assert_eq!(flatten_mode(None, true).unwrap(), FlattenMode::Auto);
        assert_eq!(flatten_mode(None, false).unwrap(), FlattenMode::None);
    }

    #[test]
    fn missing_files_name_the_path() {
        let err = load_schemas(Path::new("/nonexistent/schema.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/schema.json"));
    }
}
