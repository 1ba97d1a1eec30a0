//! Schema inference from sample records.

use crate::error::SchemaError;
use crate::schema::{CollectionSchema, Field, FieldMap};
use replicadb_storage::ColumnType;
use replicadb_sync_protocol::{DeltaBatch, Entry, Record};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Field that is always promoted to primary key of discovered collections.
pub const DISCOVERED_PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Observed {
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

#[derive(Debug, Default)]
struct NodeAnalysis {
    types: BTreeSet<Observed>,
    properties: BTreeMap<String, NodeAnalysis>,
    element: Option<Box<NodeAnalysis>>,
}

impl NodeAnalysis {
    fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Bool(_) => {
                self.types.insert(Observed::Boolean);
            }
            Value::Number(n) => {
                self.types.insert(if n.is_f64() {
                    Observed::Number
                } else {
                    Observed::Integer
                });
            }
            Value::String(_) => {
                self.types.insert(Observed::String);
            }
            Value::Object(map) => {
                self.types.insert(Observed::Object);
                self.observe_properties(map);
            }
            Value::Array(items) => {
                self.types.insert(Observed::Array);
                let element = self.element.get_or_insert_with(Default::default);
                for item in items {
                    element.observe(item);
                }
            }
        }
    }

    fn observe_properties(&mut self, map: &Record) {
        for (key, value) in map {
            self.properties.entry(key.clone()).or_default().observe(value);
        }
    }

    fn to_field(&self) -> Field {
        let mut types = self.types.iter();
        match (types.next(), types.next()) {
            (Some(Observed::Object), None) => Field::Object(
                self.properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_field()))
                    .collect(),
            ),
            (Some(Observed::Array), None) => Field::array(
                self.element
                    .as_ref()
                    .map(|e| e.to_field())
                    .unwrap_or_else(|| Field::leaf(ColumnType::Json)),
            ),
            (Some(Observed::Boolean), None) => Field::leaf(ColumnType::Boolean),
            (Some(Observed::Integer), None) => Field::leaf(ColumnType::Integer),
            (Some(Observed::Number), None) => Field::leaf(ColumnType::Number),
            (Some(Observed::String), None) => Field::leaf(ColumnType::String),
            _ => Field::leaf(ColumnType::Json),
        }
    }
}

/// Incrementally infers collection schemas from records.
///
/// Each path accumulates the set of non-null types it was seen with.
/// Array elements share one analysis regardless of index.
#[derive(Debug, Default)]
pub struct SchemaAnalyzer {
    collections: BTreeMap<String, NodeAnalysis>,
    samples: u64,
}

impl SchemaAnalyzer {
    /// Creates an empty analyzer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one record.
    pub fn observe(&mut self, collection: &str, record: &Record) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .observe_properties(record);
        self.samples += 1;
    }

    /// Feeds every entry.
    pub fn observe_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a Entry>) {
        for entry in entries {
            self.observe(&entry.collection, &entry.record);
        }
    }

    /// Feeds the new or updated entries of a batch.
    ///
    /// Deleted entries only carry predicates and say nothing about shape.
    pub fn observe_batch(&mut self, batch: &DeltaBatch) {
        self.observe_entries(&batch.new_or_updated_entries);
    }

    /// Number of records observed so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Returns true if nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Builds the schema of every observed collection.
    ///
    /// # Errors
    ///
    /// Fails if a collection never carried an `id` field, or carried it as
    /// an object or array.
    pub fn finish(&self) -> Result<Vec<CollectionSchema>, SchemaError> {
        self.collections
            .iter()
            .map(|(name, analysis)| {
                let mut fields: FieldMap = analysis
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_field()))
                    .collect();

                match fields.get_mut(DISCOVERED_PRIMARY_KEY) {
                    Some(Field::Leaf(leaf)) => leaf.is_primary_key = true,
                    Some(_) => {
                        return Err(SchemaError::InvalidPrimaryKey {
                            collection: name.clone(),
                            field: DISCOVERED_PRIMARY_KEY.to_string(),
                        })
                    }
                    None => {
                        return Err(SchemaError::MissingPrimaryKey {
                            collection: name.clone(),
                        })
                    }
                }

                debug!(collection = %name, fields = fields.len(), "discovered schema");
                Ok(CollectionSchema::new(name.clone(), fields))
            })
            .collect()
    }
}
