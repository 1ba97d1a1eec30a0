//! Schemas with their flatten options applied.

use super::{
    flatten_record, flatten_schema, resolve_auto, resolve_manual, FlatCollection, FlatRow,
    FlattenMode, FlattenOptions,
};
use crate::error::SchemaError;
use crate::schema::CollectionSchema;
use replicadb_sync_protocol::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A root collection with its resolved options and flat collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCollection {
    /// Nested schema as declared or discovered.
    pub schema: CollectionSchema,
    /// Name of the primary key field.
    pub primary_key: String,
    /// Sorted flatten options.
    pub options: FlattenOptions,
    /// Flat collections, virtual ones first and the root last.
    pub flattened: Vec<FlatCollection>,
}

impl ResolvedCollection {
    /// Validates `schema` and flattens it with `options`.
    ///
    /// # Errors
    ///
    /// Fails on invalid field names or a missing primary key.
    pub fn resolve(schema: CollectionSchema, options: FlattenOptions) -> Result<Self, SchemaError> {
        schema.validate()?;
        let primary_key = schema.primary_key()?.0.to_string();
        let flattened = flatten_schema(&schema, &options)?;
        Ok(Self {
            schema,
            primary_key,
            options,
            flattened,
        })
    }

    /// Root collection name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Flattens a record of this collection.
    pub fn flatten(&self, record: &Record) -> Vec<FlatRow> {
        flatten_record(record, &self.schema.fields, &self.options, &self.primary_key)
    }

    /// Flat collection for a model path; the empty path is the root.
    pub fn flat_collection(&self, model_path: &str) -> Option<&FlatCollection> {
        self.flattened
            .iter()
            .find(|c| c.model_path.as_deref().unwrap_or("") == model_path)
    }

    /// Virtual collections derived from this root.
    pub fn virtual_collections(&self) -> impl Iterator<Item = &FlatCollection> {
        self.flattened.iter().filter(|c| c.is_virtual())
    }
}

/// Every collection of a replica, resolved and flattened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSchema {
    collections: BTreeMap<String, ResolvedCollection>,
}

impl ResolvedSchema {
    /// Resolves flatten options for every schema according to `mode`.
    ///
    /// # Errors
    ///
    /// Any configuration problem: missing primary keys, manual options for
    /// unknown collections or paths, or two flat collections sharing a name.
    pub fn resolve(schemas: Vec<CollectionSchema>, mode: &FlattenMode) -> Result<Self, SchemaError> {
        if let FlattenMode::Manual(manual) = mode {
            if let Some(unknown) = manual
                .keys()
                .find(|name| !schemas.iter().any(|s| &s.name == *name))
            {
                return Err(SchemaError::UnknownCollection {
                    collection: unknown.clone(),
                });
            }
        }

        let mut collections = BTreeMap::new();
        let mut names = BTreeSet::new();
        for schema in schemas {
            let options = match mode {
                FlattenMode::None => FlattenOptions::default(),
                FlattenMode::Auto => resolve_auto(&schema)?,
                FlattenMode::Manual(manual) => match manual.get(&schema.name) {
                    Some(options) => resolve_manual(&schema, options)?,
                    None => FlattenOptions::default(),
                },
            };
            let resolved = ResolvedCollection::resolve(schema, options)?;
            for flat in &resolved.flattened {
                if !names.insert(flat.name().to_string()) {
                    return Err(SchemaError::NameCollision {
                        name: flat.name().to_string(),
                    });
                }
            }
            collections.insert(resolved.name().to_string(), resolved);
        }
        Ok(Self { collections })
    }

    /// Looks up a root collection.
    pub fn collection(&self, name: &str) -> Option<&ResolvedCollection> {
        self.collections.get(name)
    }

    /// Root collections in name order.
    pub fn collections(&self) -> impl Iterator<Item = &ResolvedCollection> {
        self.collections.values()
    }

    /// Every flat collection, grouped by root.
    pub fn flat_collections(&self) -> impl Iterator<Item = &FlatCollection> {
        self.collections.values().flat_map(|c| c.flattened.iter())
    }

    /// Looks up a flat collection by name.
    pub fn flat_collection(&self, name: &str) -> Option<&FlatCollection> {
        self.flat_collections().find(|c| c.name() == name)
    }

    /// Flat schemas of every collection.
    pub fn flat_schemas(&self) -> Vec<CollectionSchema> {
        self.flat_collections().map(|c| c.schema.clone()).collect()
    }

    /// Nested schemas of every root collection.
    pub fn root_schemas(&self) -> Vec<CollectionSchema> {
        self.collections.values().map(|c| c.schema.clone()).collect()
    }

    /// Returns true if any collection promotes or inlines a path.
    pub fn is_flattened(&self) -> bool {
        self.collections.values().any(|c| !c.options.is_empty())
    }
}
