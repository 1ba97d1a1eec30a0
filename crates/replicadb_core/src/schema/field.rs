//! Recursive field descriptions.

use replicadb_storage::ColumnType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields of an object or collection, keyed by name.
pub type FieldMap = BTreeMap<String, Field>;

/// A relation from a leaf field to a field of another collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Reference {
    /// Name of the relation on the owning collection.
    pub relation_name: String,
    /// Collection the field points at.
    pub target_collection: String,
    /// Field of the target collection holding the referenced value.
    pub target_field: String,
    /// Name of the inverse relation on the target collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_name: Option<String>,
}

impl Reference {
    /// Creates a reference.
    #[must_use]
    pub fn new(
        relation_name: impl Into<String>,
        target_collection: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self {
            relation_name: relation_name.into(),
            target_collection: target_collection.into(),
            target_field: target_field.into(),
            inverse_name: None,
        }
    }

    /// Sets the inverse relation name.
    #[must_use]
    pub fn with_inverse(mut self, inverse_name: impl Into<String>) -> Self {
        self.inverse_name = Some(inverse_name.into());
        self
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A primitive field stored as a single column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LeafField {
    /// Column type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether this field is the collection's primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_primary_key: bool,
    /// Whether the field is computed by the producer.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_read_only: bool,
    /// Whether values are unique within the collection.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    /// Allowed values for `Enum` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Value assumed when a record omits the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Relation to another collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

impl LeafField {
    /// Creates a plain leaf of the given type.
    #[must_use]
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            is_primary_key: false,
            is_read_only: false,
            unique: false,
            enum_values: None,
            default_value: None,
            reference: None,
        }
    }

    /// Marks the leaf as primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Marks the leaf as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    /// Marks the leaf as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Attaches a reference.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }
}

/// One property of a record.
///
/// In JSON a leaf is an object with a `type` key, an array field is a
/// one-element list holding the element description, and an object field
/// is a map of sub-fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldRepr", into = "FieldRepr")]
pub enum Field {
    /// A primitive column.
    Leaf(LeafField),
    /// Nested object.
    Object(FieldMap),
    /// List of elements sharing one description.
    Array(Box<Field>),
}

impl Field {
    /// Creates a leaf of the given type.
    #[must_use]
    pub fn leaf(column_type: ColumnType) -> Self {
        Field::Leaf(LeafField::new(column_type))
    }

    /// Creates an object field.
    #[must_use]
    pub fn object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Field)>,
        S: Into<String>,
    {
        Field::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an array field.
    #[must_use]
    pub fn array(element: Field) -> Self {
        Field::Array(Box::new(element))
    }

    /// Returns the leaf description, if this is a leaf.
    pub fn as_leaf(&self) -> Option<&LeafField> {
        match self {
            Field::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Returns true for leaf fields.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Field::Leaf(_))
    }

    /// Column type used when the field is stored as one column.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Field::Leaf(leaf) => leaf.column_type,
            Field::Object(_) | Field::Array(_) => ColumnType::Json,
        }
    }
}

impl From<LeafField> for Field {
    fn from(leaf: LeafField) -> Self {
        Field::Leaf(leaf)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FieldRepr {
    Leaf(LeafField),
    Array(Vec<Field>),
    Object(FieldMap),
}

impl TryFrom<FieldRepr> for Field {
    type Error = String;

    fn try_from(repr: FieldRepr) -> Result<Self, Self::Error> {
        match repr {
            FieldRepr::Leaf(leaf) => Ok(Field::Leaf(leaf)),
            FieldRepr::Object(fields) => Ok(Field::Object(fields)),
            FieldRepr::Array(mut elements) => {
                if elements.len() != 1 {
                    return Err(format!(
                        "array field must describe exactly one element type, got {}",
                        elements.len()
                    ));
                }
                Ok(Field::Array(Box::new(elements.remove(0))))
            }
        }
    }
}

impl From<Field> for FieldRepr {
    fn from(field: Field) -> Self {
        match field {
            Field::Leaf(leaf) => FieldRepr::Leaf(leaf),
            Field::Object(fields) => FieldRepr::Object(fields),
            Field::Array(element) => FieldRepr::Array(vec![*element]),
        }
    }
}
