//! Flatten options and their resolution.

use crate::error::SchemaError;
use crate::path;
use crate::schema::{element_fields, CollectionSchema, Field, FieldMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Resolved flatten options of one collection.
///
/// Both lists are kept sorted and free of duplicates; flattening relies on
/// ancestors sorting before their descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawOptions")]
pub struct FlattenOptions {
    as_models: Vec<String>,
    as_fields: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    #[serde(default)]
    as_models: Vec<String>,
    #[serde(default)]
    as_fields: Vec<String>,
}

impl From<RawOptions> for FlattenOptions {
    fn from(raw: RawOptions) -> Self {
        Self::new(raw.as_models, raw.as_fields)
    }
}

fn sorted(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    paths
}

impl FlattenOptions {
    /// Creates options; the lists are sorted here.
    #[must_use]
    pub fn new<M, F>(as_models: M, as_fields: F) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            as_models: sorted(as_models.into_iter().map(Into::into).collect()),
            as_fields: sorted(as_fields.into_iter().map(Into::into).collect()),
        }
    }

    /// Paths promoted to virtual collections, sorted.
    pub fn as_models(&self) -> &[String] {
        &self.as_models
    }

    /// Paths inlined as escaped columns, sorted.
    pub fn as_fields(&self) -> &[String] {
        &self.as_fields
    }

    /// Returns true when nothing is flattened.
    pub fn is_empty(&self) -> bool {
        self.as_models.is_empty() && self.as_fields.is_empty()
    }

    /// Models not nested under another model.
    pub fn top_level_models(&self) -> Vec<&str> {
        let mut top: Vec<&str> = Vec::new();
        for model in &self.as_models {
            if !top.iter().any(|t| path::is_under(model, t)) {
                top.push(model);
            }
        }
        top
    }
}

/// One user-configured `asFields` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AsFieldSpec {
    /// Inline every leaf below the path.
    Path(String),
    /// Inline leaves at most `level` levels below the path.
    Level {
        /// Path of the object to inline.
        path: String,
        /// Maximum depth.
        level: usize,
    },
}

impl AsFieldSpec {
    fn parts(&self) -> (&str, Option<usize>) {
        match self {
            AsFieldSpec::Path(path) => (path, None),
            AsFieldSpec::Level { path, level } => (path, Some(*level)),
        }
    }
}

impl From<&str> for AsFieldSpec {
    fn from(path: &str) -> Self {
        AsFieldSpec::Path(path.to_string())
    }
}

/// User-supplied flatten options for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualFlattenOptions {
    /// Paths promoted to virtual collections.
    #[serde(default)]
    pub as_models: Vec<String>,
    /// Paths to inline.
    #[serde(default)]
    pub as_fields: Vec<AsFieldSpec>,
}

impl ManualFlattenOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a promoted model.
    #[must_use]
    pub fn with_model(mut self, path: impl Into<String>) -> Self {
        self.as_models.push(path.into());
        self
    }

    /// Adds an inlined field.
    #[must_use]
    pub fn with_field(mut self, spec: impl Into<AsFieldSpec>) -> Self {
        self.as_fields.push(spec.into());
        self
    }

    /// Returns true when nothing is promoted or inlined.
    pub fn is_empty(&self) -> bool {
        self.as_models.is_empty() && self.as_fields.is_empty()
    }
}

/// How flatten options are chosen for every collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenMode {
    /// Records are stored as-is, nested values as JSON columns.
    #[default]
    None,
    /// Objects are inlined and arrays promoted everywhere.
    Auto,
    /// Per-collection options; unlisted collections are not flattened.
    Manual(BTreeMap<String, ManualFlattenOptions>),
}

impl FlattenMode {
    /// Returns true if this mode can promote or inline anything.
    pub fn flattens(&self) -> bool {
        match self {
            FlattenMode::None => false,
            FlattenMode::Auto => true,
            FlattenMode::Manual(options) => options.values().any(|o| !o.is_empty()),
        }
    }
}

/// Computes options that inline every object and promote every array.
///
/// # Errors
///
/// Fails when the collection has no primary key to anchor child rows to.
pub fn resolve_auto(schema: &CollectionSchema) -> Result<FlattenOptions, SchemaError> {
    schema.primary_key()?;
    let mut as_models = Vec::new();
    let mut as_fields = Vec::new();
    collect_auto(&schema.fields, 0, "", &mut as_models, &mut as_fields);
    Ok(FlattenOptions::new(as_models, as_fields))
}

fn collect_auto(
    fields: &FieldMap,
    distance: usize,
    prefix: &str,
    as_models: &mut Vec<String>,
    as_fields: &mut Vec<String>,
) {
    for (name, field) in fields {
        let path = path::join(prefix, name);
        match field {
            Field::Leaf(_) => {
                if distance > 0 {
                    as_fields.push(path);
                }
            }
            Field::Object(children) => {
                collect_auto(children, distance + 1, &path, as_models, as_fields);
            }
            Field::Array(element) => {
                collect_auto(&element_fields(element), 0, &path, as_models, as_fields);
                as_models.push(path);
            }
        }
    }
}

/// Validates user options against the schema and expands `asFields`
/// entries into concrete paths.
///
/// # Errors
///
/// Fails when a path is missing from the schema, a model is a leaf, or a
/// path crosses an array that is not itself promoted.
pub fn resolve_manual(
    schema: &CollectionSchema,
    manual: &ManualFlattenOptions,
) -> Result<FlattenOptions, SchemaError> {
    schema.primary_key()?;
    let models: BTreeSet<&str> = manual.as_models.iter().map(String::as_str).collect();

    for model in &models {
        if resolve_node(schema, &models, model)?.is_leaf() {
            return Err(SchemaError::LeafModel {
                collection: schema.name.clone(),
                path: model.to_string(),
            });
        }
    }

    let mut expanded = Vec::new();
    for spec in &manual.as_fields {
        let (path, level) = spec.parts();
        let node = resolve_node(schema, &models, path)?;
        expand(&node, path.to_string(), level, &mut expanded);
    }
    expanded.retain(|p| keeps_nesting(p, &models));

    Ok(FlattenOptions::new(models, expanded))
}

/// Walks to the field at `path`, entering arrays only through promoted models.
fn resolve_node(
    schema: &CollectionSchema,
    models: &BTreeSet<&str>,
    path: &str,
) -> Result<Field, SchemaError> {
    let unknown = || SchemaError::UnknownPath {
        collection: schema.name.clone(),
        path: path.to_string(),
    };

    let mut fields = schema.fields.clone();
    let mut current_path = String::new();
    let mut node: Option<Field> = None;
    for segment in path.split(path::SEPARATOR) {
        if let Some(parent) = node.take() {
            fields = match parent {
                Field::Object(children) => children,
                Field::Array(element) if models.contains(current_path.as_str()) => {
                    element_fields(&element)
                }
                Field::Array(_) => {
                    return Err(SchemaError::PathThroughArray {
                        collection: schema.name.clone(),
                        path: path.to_string(),
                    })
                }
                Field::Leaf(_) => return Err(unknown()),
            };
        }
        current_path = path::join(&current_path, segment);
        node = Some(fields.remove(segment).ok_or_else(unknown)?);
    }
    node.ok_or_else(unknown)
}

fn expand(node: &Field, path: String, depth: Option<usize>, out: &mut Vec<String>) {
    match node {
        Field::Object(children) if depth != Some(0) => {
            for (name, child) in children {
                expand(child, path::join(&path, name), depth.map(|d| d - 1), out);
            }
        }
        _ => out.push(path),
    }
}

/// A path is worth inlining only if, below its nearest enclosing model, it
/// still has nesting left to flatten.
fn keeps_nesting(path: &str, models: &BTreeSet<&str>) -> bool {
    if models.contains(path) {
        return false;
    }
    let relative = models
        .iter()
        .filter_map(|m| path::strip_ancestor(path, m))
        .min_by_key(|rest| rest.len())
        .unwrap_or(path);
    relative.contains(path::SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LeafField;
    use replicadb_storage::ColumnType;

    fn users() -> CollectionSchema {
        CollectionSchema::new("users", FieldMap::new())
            .with_field("id", LeafField::new(ColumnType::Integer).primary_key())
            .with_field("name", Field::leaf(ColumnType::String))
            .with_field(
                "address",
                Field::object([
                    ("city", Field::leaf(ColumnType::String)),
                    (
                        "geo",
                        Field::object([
                            ("lat", Field::leaf(ColumnType::Number)),
                            ("lng", Field::leaf(ColumnType::Number)),
                        ]),
                    ),
                ]),
            )
            .with_field(
                "orders",
                Field::array(Field::object([
                    ("sku", Field::leaf(ColumnType::String)),
                    ("lines", Field::array(Field::leaf(ColumnType::Integer))),
                    ("meta", Field::object([("note", Field::leaf(ColumnType::String))])),
                ])),
            )
    }

    #[test]
    fn options_are_sorted_and_deduplicated() {
        let options = FlattenOptions::new(["b", "a", "b"], ["z.y", "a.b"]);
        assert_eq!(options.as_models(), ["a", "b"]);
        assert_eq!(options.as_fields(), ["a.b", "z.y"]);
    }

    #[test]
    fn deserialized_options_are_sorted() {
        let options: FlattenOptions =
            serde_json::from_str(r#"{"asModels": ["x.y", "x"], "asFields": []}"#).unwrap();
        assert_eq!(options.as_models(), ["x", "x.y"]);
        assert_eq!(options.top_level_models(), vec!["x"]);
    }

    #[test]
    fn auto_inlines_objects_and_promotes_arrays() {
        let options = resolve_auto(&users()).unwrap();
        assert_eq!(options.as_models(), ["orders", "orders.lines"]);
        assert_eq!(
            options.as_fields(),
            ["address.city", "address.geo.lat", "address.geo.lng", "orders.meta.note"]
        );
    }

    #[test]
    fn auto_requires_primary_key() {
        let schema = CollectionSchema::new("t", FieldMap::new())
            .with_field("tags", Field::array(Field::leaf(ColumnType::String)));
        assert!(matches!(
            resolve_auto(&schema),
            Err(SchemaError::MissingPrimaryKey { .. })
        ));
    }

    #[test]
    fn manual_expands_bare_path_without_limit() {
        let manual = ManualFlattenOptions::new().with_field("address");
        let options = resolve_manual(&users(), &manual).unwrap();
        assert!(options.as_models().is_empty());
        assert_eq!(
            options.as_fields(),
            ["address.city", "address.geo.lat", "address.geo.lng"]
        );
    }

    #[test]
    fn manual_level_keeps_deeper_objects_nested() {
        let manual = ManualFlattenOptions::new().with_field(AsFieldSpec::Level {
            path: "address".into(),
            level: 1,
        });
        let options = resolve_manual(&users(), &manual).unwrap();
        assert_eq!(options.as_fields(), ["address.city", "address.geo"]);
    }

    #[test]
    fn manual_drops_fields_captured_by_their_model() {
        let manual = ManualFlattenOptions::new()
            .with_model("orders")
            .with_field("orders")
            .with_field("orders.sku")
            .with_field("orders.meta");
        let options = resolve_manual(&users(), &manual).unwrap();
        assert_eq!(options.as_models(), ["orders"]);
        // Only `meta.note` still has nesting below the `orders` model.
        assert_eq!(options.as_fields(), ["orders.meta.note"]);
    }

    #[test]
    fn manual_rejects_paths_through_unpromoted_arrays() {
        let manual = ManualFlattenOptions::new().with_model("orders.lines");
        assert!(matches!(
            resolve_manual(&users(), &manual),
            Err(SchemaError::PathThroughArray { .. })
        ));

        let nested = ManualFlattenOptions::new()
            .with_model("orders")
            .with_model("orders.lines");
        let options = resolve_manual(&users(), &nested).unwrap();
        assert_eq!(options.as_models(), ["orders", "orders.lines"]);
    }

    #[test]
    fn manual_rejects_unknown_and_leaf_paths() {
        let unknown = ManualFlattenOptions::new().with_field("address.zip");
        assert_eq!(
            resolve_manual(&users(), &unknown).unwrap_err(),
            SchemaError::UnknownPath {
                collection: "users".into(),
                path: "address.zip".into()
            }
        );

        let leaf = ManualFlattenOptions::new().with_model("name");
        assert!(matches!(
            resolve_manual(&users(), &leaf),
            Err(SchemaError::LeafModel { .. })
        ));
    }

    #[test]
    fn mode_deserializes_from_json() {
        let mode: FlattenMode = serde_json::from_str(
            r#"{"manual": {"users": {"asModels": ["orders"], "asFields": ["address", {"path": "orders.meta", "level": 1}]}}}"#,
        )
        .unwrap();
        let FlattenMode::Manual(map) = &mode else {
            panic!("expected manual mode");
        };
        assert_eq!(map["users"].as_fields.len(), 2);
        assert!(mode.flattens());
        assert!(!FlattenMode::None.flattens());
        assert_eq!(serde_json::from_str::<FlattenMode>(r#""auto""#).unwrap(), FlattenMode::Auto);
    }
}
