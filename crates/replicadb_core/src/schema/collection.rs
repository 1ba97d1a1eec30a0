//! Collection schemas.

use super::field::{Field, FieldMap, LeafField};
use crate::error::SchemaError;
use crate::path;
use replicadb_storage::{ColumnDef, TableSchema};
use serde::{Deserialize, Serialize};

/// Schema of one collection: a name and its field tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Top-level fields.
    pub fields: FieldMap,
}

impl CollectionSchema {
    /// Creates a collection schema.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Builder-style helper adding one field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    /// Returns the primary key field.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one top-level field is a leaf marked as primary key.
    pub fn primary_key(&self) -> Result<(&str, &LeafField), SchemaError> {
        let mut found = None;
        for (name, field) in &self.fields {
            if let Field::Leaf(leaf) = field {
                if leaf.is_primary_key {
                    if found.is_some() {
                        return Err(SchemaError::MultiplePrimaryKeys {
                            collection: self.name.clone(),
                        });
                    }
                    found = Some((name.as_str(), leaf));
                }
            }
        }
        found.ok_or_else(|| SchemaError::MissingPrimaryKey {
            collection: self.name.clone(),
        })
    }

    /// Checks field names and the primary key.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_names(&self.name, &self.fields)?;
        self.primary_key()?;
        Ok(())
    }

    /// Physical table for this collection.
    ///
    /// Leaves map to typed columns; objects and arrays are stored as JSON.
    pub fn to_table_schema(&self) -> TableSchema {
        let columns = self
            .fields
            .iter()
            .map(|(name, field)| {
                let mut column = ColumnDef::new(name.clone(), field.column_type());
                if let Field::Leaf(leaf) = field {
                    if leaf.is_primary_key {
                        column = column.primary_key();
                    } else if leaf.unique {
                        column = column.unique();
                    }
                }
                column
            })
            .collect();
        TableSchema::new(self.name.clone(), columns)
    }
}

fn validate_names(collection: &str, fields: &FieldMap) -> Result<(), SchemaError> {
    for (name, field) in fields {
        if !path::is_valid_field_name(name) {
            return Err(SchemaError::InvalidFieldName {
                collection: collection.to_string(),
                name: name.clone(),
            });
        }
        let mut node = field;
        while let Field::Array(element) = node {
            node = element;
        }
        if let Field::Object(children) = node {
            validate_names(collection, children)?;
        }
    }
    Ok(())
}

/// Looks up the field at a dotted path, descending through objects only.
pub fn lookup<'a>(fields: &'a FieldMap, path: &str) -> Option<&'a Field> {
    let mut segments = path.split(path::SEPARATOR);
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        match current {
            Field::Object(children) => current = children.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Removes the field at a dotted path, pruning objects left empty.
pub fn remove_path(fields: &mut FieldMap, path: &str) -> Option<Field> {
    match path.split_once(path::SEPARATOR) {
        None => fields.remove(path),
        Some((head, rest)) => {
            let Some(Field::Object(children)) = fields.get_mut(head) else {
                return None;
            };
            let removed = remove_path(children, rest);
            if removed.is_some() && children.is_empty() {
                fields.remove(head);
            }
            removed
        }
    }
}

/// Fields describing one element of an array.
///
/// Object elements use their own fields; anything else is wrapped as a
/// single `value` field.
pub fn element_fields(element: &Field) -> FieldMap {
    match element {
        Field::Object(fields) => fields.clone(),
        other => FieldMap::from([(VALUE_FIELD.to_string(), other.clone())]),
    }
}

/// Name of the field wrapping non-object array elements.
pub const VALUE_FIELD: &str = "value";

/// Clears primary key flags on every leaf of the tree.
pub(crate) fn clear_primary_keys(field: &mut Field) {
    match field {
        Field::Leaf(leaf) => leaf.is_primary_key = false,
        Field::Object(children) => children.values_mut().for_each(clear_primary_keys),
        Field::Array(element) => clear_primary_keys(element),
    }
}
