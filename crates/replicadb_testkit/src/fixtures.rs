//! Test fixtures and cache helpers.
//!
//! Provides sample schemas and records, an in-memory cache harness, and
//! temporary fixture files.

use replicadb_core::flatten::{FlattenMode, ResolvedSchema};
use replicadb_core::schema::{CollectionSchema, Field, FieldMap, LeafField, Reference};
use replicadb_core::{CacheReader, CacheTarget};
use replicadb_storage::{ColumnType, InMemoryTableStore, Query, Row, TableStore};
use replicadb_sync_protocol::{Entry, Record};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Converts a JSON object literal into a record.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// The `{id, tags: [String]}` collection used throughout the docs.
pub fn tagged_schema(name: &str) -> CollectionSchema {
    CollectionSchema::new(name, FieldMap::new())
        .with_field("id", LeafField::new(ColumnType::Number).primary_key())
        .with_field("tags", Field::array(Field::leaf(ColumnType::String)))
}

/// A `users` collection with nested objects and arrays.
pub fn users_schema() -> CollectionSchema {
    CollectionSchema::new("users", FieldMap::new())
        .with_field("id", LeafField::new(ColumnType::Integer).primary_key())
        .with_field("name", Field::leaf(ColumnType::String))
        .with_field("email", LeafField::new(ColumnType::String).unique())
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
        .with_field("tags", Field::array(Field::leaf(ColumnType::String)))
        .with_field(
            "orders",
            Field::array(Field::object([
                ("sku", Field::leaf(ColumnType::String)),
                ("qty", Field::leaf(ColumnType::Integer)),
                ("lines", Field::array(Field::leaf(ColumnType::Integer))),
            ])),
        )
}

/// A `posts` collection referencing `users`.
pub fn posts_schema() -> CollectionSchema {
    CollectionSchema::new("posts", FieldMap::new())
        .with_field("id", LeafField::new(ColumnType::Integer).primary_key())
        .with_field("title", Field::leaf(ColumnType::String))
        .with_field(
            "author_id",
            LeafField::new(ColumnType::Integer)
                .with_reference(Reference::new("author", "users", "id").with_inverse("posts")),
        )
}

/// A `users` record matching [`users_schema`].
pub fn user_record(id: i64) -> Record {
    record(json!({
        "id": id,
        "name": format!("user {id}"),
        "email": format!("user{id}@example.com"),
        "address": {"city": "Oslo", "geo": {"lat": 59.91, "lng": 10.75}},
        "tags": ["a", "b"],
        "orders": [
            {"sku": "x-1", "qty": 2, "lines": [1, 2]},
            {"sku": "x-2", "qty": 1, "lines": []}
        ]
    }))
}

/// A `users` entry.
pub fn user_entry(id: i64) -> Entry {
    Entry::new("users", user_record(id))
}

/// A `posts` entry.
pub fn post_entry(id: i64, author_id: i64) -> Entry {
    Entry::new(
        "posts",
        record(json!({"id": id, "title": format!("post {id}"), "author_id": author_id})),
    )
}

/// An in-memory cache with its tables created.
pub struct TestCache {
    /// The store holding every table.
    pub store: Arc<InMemoryTableStore>,
    /// The resolved schema.
    pub schema: Arc<ResolvedSchema>,
    /// Target writing into `store`.
    pub target: CacheTarget,
}

impl TestCache {
    /// Creates a cache for `schemas` flattened with `mode`.
    ///
    /// # Panics
    ///
    /// Panics if the schemas do not resolve.
    #[must_use]
    pub fn new(schemas: Vec<CollectionSchema>, mode: &FlattenMode) -> Self {
        let schema = Arc::new(ResolvedSchema::resolve(schemas, mode).expect("schema resolves"));
        let store = Arc::new(InMemoryTableStore::new());
        let target = CacheTarget::new(store.clone(), schema.clone());
        target.create_tables().expect("tables created");
        Self {
            store,
            schema,
            target,
        }
    }

    /// Creates a cache for one schema in auto mode.
    #[must_use]
    pub fn auto(schema: CollectionSchema) -> Self {
        Self::new(vec![schema], &FlattenMode::Auto)
    }

    /// All rows of `table`, in key order.
    ///
    /// # Panics
    ///
    /// Panics if the table does not exist.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.store.query(table, &Query::all()).expect("table exists")
    }

    /// Every flat table with its rows.
    pub fn snapshot(&self) -> Vec<(String, Vec<Row>)> {
        self.schema
            .flat_collections()
            .map(|c| (c.name().to_string(), self.rows(c.name())))
            .collect()
    }

    /// A reader over the cache.
    pub fn reader(&self) -> CacheReader {
        CacheReader::new(self.store.clone())
    }
}

/// Runs a test with an auto-flattened cache for `schema`.
pub fn with_test_cache<F, R>(schema: CollectionSchema, f: F) -> R
where
    F: FnOnce(&TestCache) -> R,
{
    let cache = TestCache::auto(schema);
    f(&cache)
}

/// A temporary directory for JSON fixture files.
pub struct FixtureDir {
    dir: TempDir,
}

impl FixtureDir {
    /// Creates an empty directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `value` as pretty JSON.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> PathBuf {
        let path = self.dir.path().join(name);
        let text = serde_json::to_string_pretty(value).expect("serializable fixture");
        std::fs::write(&path, text).expect("Failed to write fixture");
        path
    }

    /// Writes one compact JSON value per line.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_lines(&self, name: &str, values: &[Value]) -> PathBuf {
        let path = self.dir.path().join(name);
        let text: String = values.iter().map(|v| format!("{v}\n")).collect();
        std::fs::write(&path, text).expect("Failed to write fixture");
        path
    }
}

impl Default for FixtureDir {
    fn default() -> Self {
        Self::new()
    }
}
