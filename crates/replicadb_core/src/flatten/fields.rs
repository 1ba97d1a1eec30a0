//! Schema flattening.

use super::{partition, FlattenOptions, FID, FPID};
use crate::error::SchemaError;
use crate::path;
use crate::schema::{
    clear_primary_keys, element_fields, remove_path, CollectionSchema, Field, FieldMap, LeafField,
    Reference,
};
use replicadb_storage::ColumnType;
use serde::{Deserialize, Serialize};

/// Relation name of the `_fpid` reference on virtual collections.
const PARENT_RELATION: &str = "parent";

/// One collection of a flattened schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatCollection {
    /// Root collection this one was derived from.
    pub root: String,
    /// Promoted path inside the root; `None` for the root itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    /// Flat schema: leaves and JSON columns only.
    pub schema: CollectionSchema,
}

impl FlatCollection {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns true for collections derived from a promoted model.
    pub fn is_virtual(&self) -> bool {
        self.model_path.is_some()
    }

    /// Returns true if the collection declares `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.schema.fields.contains_key(field)
    }
}

/// Flattens a collection schema with the same traversal records use.
///
/// Virtual collections come before their parents and the root collection
/// is last. Each virtual collection gets a `_fid` primary key and a `_fpid`
/// reference to its parent's key, unique when the promoted node is not an
/// array.
///
/// # Errors
///
/// Fails when the collection has no primary key.
pub fn flatten_schema(
    schema: &CollectionSchema,
    options: &FlattenOptions,
) -> Result<Vec<FlatCollection>, SchemaError> {
    let (key, leaf) = schema.primary_key()?;
    let as_models: Vec<&str> = options.as_models().iter().map(String::as_str).collect();
    let as_fields: Vec<&str> = options.as_fields().iter().map(String::as_str).collect();

    let mut out = Vec::new();
    let parent = Parent {
        root: &schema.name,
        name: schema.name.clone(),
        model_path: "",
        key,
        key_type: leaf.column_type,
    };
    flatten_fields(schema.fields.clone(), &parent, &as_fields, &as_models, &mut out);
    Ok(out)
}

struct Parent<'a> {
    root: &'a str,
    name: String,
    model_path: &'a str,
    key: &'a str,
    key_type: ColumnType,
}

fn flatten_fields(
    mut fields: FieldMap,
    node: &Parent<'_>,
    as_fields: &[&str],
    as_models: &[&str],
    out: &mut Vec<FlatCollection>,
) {
    let partition = partition(as_fields, as_models);

    for group in &partition.models {
        let Some(field) = remove_path(&mut fields, group.path) else {
            continue;
        };
        let (is_array, element) = match field {
            Field::Array(element) => (true, *element),
            other => (false, other),
        };

        let mut child_fields = element_fields(&element);
        child_fields.values_mut().for_each(clear_primary_keys);

        let mut fpid = LeafField::new(node.key_type).with_reference(
            Reference::new(PARENT_RELATION, node.name.clone(), node.key)
                .with_inverse(group.path.replace(path::SEPARATOR, "_")),
        );
        if !is_array {
            fpid = fpid.unique();
        }
        child_fields.insert(
            FID.to_string(),
            LeafField::new(ColumnType::String).primary_key().into(),
        );
        child_fields.insert(FPID.to_string(), fpid.into());

        let model_path = path::join(node.model_path, group.path);
        let child = Parent {
            root: node.root,
            name: path::virtual_collection_name(node.root, &model_path),
            model_path: &model_path,
            key: FID,
            key_type: ColumnType::String,
        };
        flatten_fields(child_fields, &child, &group.fields, &group.models, out);
    }

    for inline in &partition.fields {
        if let Some(mut field) = remove_path(&mut fields, inline) {
            clear_primary_keys(&mut field);
            fields.insert(path::escape(inline), field);
        }
    }

    out.push(FlatCollection {
        root: node.root.to_string(),
        model_path: (!node.model_path.is_empty()).then(|| node.model_path.to_string()),
        schema: CollectionSchema::new(node.name.clone(), fields),
    });
}
