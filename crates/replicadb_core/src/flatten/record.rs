//! Record flattening.

use super::{partition, FlattenOptions, FID, FPID};
use crate::path;
use crate::schema::{element_fields, lookup, Field, FieldMap, VALUE_FIELD};
use replicadb_sync_protocol::Record;
use serde_json::Value;

/// One row produced by flattening a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    /// Model path the row belongs to; empty for the root collection.
    pub model_path: String,
    /// Row content.
    pub row: Record,
}

impl FlatRow {
    /// Returns true for the row of the root collection.
    pub fn is_root(&self) -> bool {
        self.model_path.is_empty()
    }

    /// Name of the collection this row belongs to.
    pub fn collection_name(&self, root: &str) -> String {
        if self.is_root() {
            root.to_string()
        } else {
            path::virtual_collection_name(root, &self.model_path)
        }
    }
}

/// Decomposes `record` into flat rows.
///
/// Rows of promoted models come first, children before parents, and the
/// root row is always last. The output depends only on the record, the
/// schema and the (sorted) options.
pub fn flatten_record(
    record: &Record,
    fields: &FieldMap,
    options: &FlattenOptions,
    primary_key: &str,
) -> Vec<FlatRow> {
    let identity = record.get(primary_key).cloned().unwrap_or(Value::Null);
    let as_models: Vec<&str> = options.as_models().iter().map(String::as_str).collect();
    let as_fields: Vec<&str> = options.as_fields().iter().map(String::as_str).collect();

    let id_prefix = path::render_id(&identity);
    let mut out = Vec::new();
    let root = Node {
        fields: Some(fields),
        identity: &identity,
        id_prefix: &id_prefix,
        model_path: "",
    };
    flatten_node(record.clone(), &root, &as_fields, &as_models, &mut out);
    out
}

struct Node<'a> {
    fields: Option<&'a FieldMap>,
    identity: &'a Value,
    id_prefix: &'a str,
    model_path: &'a str,
}

fn flatten_node(
    mut record: Record,
    node: &Node<'_>,
    as_fields: &[&str],
    as_models: &[&str],
    out: &mut Vec<FlatRow>,
) {
    let partition = partition(as_fields, as_models);

    for group in &partition.models {
        let element = match node.fields.and_then(|f| lookup(f, group.path)) {
            Some(Field::Array(element)) => Some(element.as_ref()),
            other => other,
        };
        let Some(value) = path::remove(&mut record, group.path) else {
            continue;
        };
        let child_fields = element.map(element_fields);
        let model_path = path::join(node.model_path, group.path);

        let items: Vec<(Option<usize>, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Some(i), item))
                .collect(),
            single => vec![(None, single)],
        };

        for (index, item) in items {
            if item.is_null() {
                continue;
            }
            let fid = match index {
                Some(i) => format!("{}.{}.{i}", node.id_prefix, group.path),
                None => format!("{}.{}", node.id_prefix, group.path),
            };
            let mut child = wrap_element(item, element);
            child.insert(FID.to_string(), Value::String(fid.clone()));
            child.insert(FPID.to_string(), node.identity.clone());

            let identity = Value::String(fid.clone());
            let child_node = Node {
                fields: child_fields.as_ref(),
                identity: &identity,
                id_prefix: &fid,
                model_path: &model_path,
            };
            flatten_node(child, &child_node, &group.fields, &group.models, out);
        }
    }

    for field in &partition.fields {
        if let Some(value) = path::remove(&mut record, field) {
            record.insert(path::escape(field), value);
        }
    }

    out.push(FlatRow {
        model_path: node.model_path.to_string(),
        row: record,
    });
}

/// Object elements keep their shape; anything else, or elements described
/// as a non-object, are wrapped as `{"value": element}`.
fn wrap_element(item: Value, element: Option<&Field>) -> Record {
    match (item, element) {
        (Value::Object(map), None | Some(Field::Object(_))) => map,
        (other, _) => Record::from_iter([(VALUE_FIELD.to_string(), other)]),
    }
}
