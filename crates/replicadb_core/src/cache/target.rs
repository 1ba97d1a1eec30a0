//! Application of dump pages and delta batches to the cache.

use crate::error::CoreResult;
use crate::flatten::{ResolvedCollection, ResolvedSchema, FID};
use crate::path;
use parking_lot::Mutex;
use replicadb_storage::{Filter, Query, Row, TableOp, TableStore};
use replicadb_sync_protocol::{DeltaBatch, Entry};
use serde_json::Value;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Counters describing what one apply call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Entries written or deleted.
    pub entries_applied: u64,
    /// Entries skipped because of their shape.
    pub entries_skipped: u64,
    /// Rows inserted or replaced.
    pub rows_written: u64,
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Unknown fields dropped from records.
    pub fields_dropped: u64,
}

impl AddAssign for ApplyStats {
    fn add_assign(&mut self, other: Self) {
        self.entries_applied += other.entries_applied;
        self.entries_skipped += other.entries_skipped;
        self.rows_written += other.rows_written;
        self.rows_deleted += other.rows_deleted;
        self.fields_dropped += other.fields_dropped;
    }
}

/// Rows of one entry, ready to write.
struct PreparedEntry<'a> {
    collection: &'a ResolvedCollection,
    id: Value,
    rows: Vec<(String, Row)>,
}

/// Writes producer data into the physical tables of a namespace.
///
/// Apply calls are serialized through an internal lock so there is only
/// ever one writer, whoever calls.
pub struct CacheTarget {
    store: Arc<dyn TableStore>,
    schema: Arc<ResolvedSchema>,
    write_lock: Mutex<()>,
}

impl CacheTarget {
    /// Creates a target for `schema` over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TableStore>, schema: Arc<ResolvedSchema>) -> Self {
        Self {
            store,
            schema,
            write_lock: Mutex::new(()),
        }
    }

    /// Schema the target writes.
    pub fn schema(&self) -> &Arc<ResolvedSchema> {
        &self.schema
    }

    /// Creates every flat table that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a table cannot be created.
    pub fn create_tables(&self) -> CoreResult<()> {
        for flat in self.schema.flat_collections() {
            if !self.store.has_table(flat.name())? {
                debug!(collection = %flat.name(), "creating table");
                self.store.create_table(flat.schema.to_table_schema())?;
            }
        }
        Ok(())
    }

    /// Drops every flat table of the schema.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a drop fails.
    pub fn drop_tables(&self) -> CoreResult<()> {
        for flat in self.schema.flat_collections() {
            if self.store.drop_table(flat.name())? {
                debug!(collection = %flat.name(), "dropped table");
            }
        }
        Ok(())
    }

    /// Applies one dump page.
    ///
    /// The first page of a dump empties every table of the namespace. The
    /// page is written as one store batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error; entries with an unexpected shape are logged
    /// and skipped instead.
    pub fn apply_dump(&self, entries: &[Entry], is_first_page: bool) -> CoreResult<ApplyStats> {
        let _guard = self.write_lock.lock();
        let mut stats = ApplyStats::default();
        let mut ops = Vec::new();

        if is_first_page {
            for flat in self.schema.flat_collections() {
                if self.store.has_table(flat.name())? {
                    ops.push(TableOp::Truncate(flat.name().to_string()));
                }
            }
        }

        let mut rows = Vec::new();
        for entry in entries {
            let Some(prepared) = self.prepare(entry, &mut stats) else {
                continue;
            };
            stats.entries_applied += 1;
            rows.extend(prepared.rows);
        }
        // Upserts keep a replayed page idempotent.
        ops.extend(upserts(rows));

        stats.rows_written += self.store.apply_batch(ops)?.rows_written;
        debug!(
            entries = entries.len(),
            rows = stats.rows_written,
            first_page = is_first_page,
            "applied dump page"
        );
        Ok(stats)
    }

    /// Applies one delta batch: deletions first, then upserts.
    ///
    /// An updated record replaces its whole subtree: its virtual child rows
    /// are removed before the new rows are written. The batch is written as
    /// one store batch.
    ///
    /// # Errors
    ///
    /// Returns a storage error; entries with an unexpected shape are logged
    /// and skipped instead.
    pub fn apply_delta(&self, batch: &DeltaBatch) -> CoreResult<ApplyStats> {
        let _guard = self.write_lock.lock();
        let mut stats = ApplyStats::default();
        let mut ops = Vec::new();

        for entry in &batch.deleted_entries {
            self.delete_entry(entry, &mut stats, &mut ops)?;
        }

        for entry in &batch.new_or_updated_entries {
            let Some(prepared) = self.prepare(entry, &mut stats) else {
                continue;
            };
            ops.extend(child_deletes(prepared.collection, &prepared.id));
            ops.extend(upserts(prepared.rows));
            stats.entries_applied += 1;
        }

        let written = self.store.apply_batch(ops)?;
        stats.rows_written += written.rows_written;
        stats.rows_deleted += written.rows_deleted;
        debug!(
            upserts = batch.new_or_updated_entries.len(),
            deletes = batch.deleted_entries.len(),
            rows_written = stats.rows_written,
            rows_deleted = stats.rows_deleted,
            "applied delta batch"
        );
        Ok(stats)
    }

    fn delete_entry(
        &self,
        entry: &Entry,
        stats: &mut ApplyStats,
        ops: &mut Vec<TableOp>,
    ) -> CoreResult<()> {
        let Some(collection) = self.schema.collection(&entry.collection) else {
            error!(collection = %entry.collection, "deleted entry for unknown collection, skipping");
            stats.entries_skipped += 1;
            return Ok(());
        };
        if entry.record.is_empty() {
            warn!(collection = %entry.collection, "deleted entry has an empty predicate, skipping");
            stats.entries_skipped += 1;
            return Ok(());
        }

        let predicate = Filter::matching(&entry.record);
        let key = &collection.primary_key;
        let ids: Vec<Value> = match entry.record.get(key) {
            Some(id) if !id.is_null() => vec![id.clone()],
            _ => self
                .store
                .query(
                    collection.name(),
                    &Query::new(predicate.clone()).with_projection([key.as_str()]),
                )?
                .into_iter()
                .filter_map(|mut row| row.remove(key))
                .collect(),
        };

        for id in &ids {
            ops.extend(child_deletes(collection, id));
        }
        ops.push(TableOp::Delete {
            table: collection.name().to_string(),
            filter: predicate,
        });
        stats.entries_applied += 1;
        Ok(())
    }

    fn prepare<'a>(&'a self, entry: &Entry, stats: &mut ApplyStats) -> Option<PreparedEntry<'a>> {
        let Some(collection) = self.schema.collection(&entry.collection) else {
            error!(collection = %entry.collection, "entry for unknown collection, skipping");
            stats.entries_skipped += 1;
            return None;
        };

        let recognized = entry
            .record
            .keys()
            .filter(|k| collection.schema.fields.contains_key(k.as_str()))
            .count();
        if recognized == 0 {
            error!(collection = %entry.collection, "entry has no recognized fields, skipping");
            stats.entries_skipped += 1;
            return None;
        }

        let id = match entry.record.get(&collection.primary_key) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                error!(
                    collection = %entry.collection,
                    primary_key = %collection.primary_key,
                    "entry has no primary key, skipping"
                );
                stats.entries_skipped += 1;
                return None;
            }
        };

        let mut dropped = Vec::new();
        let mut rows = Vec::new();
        for flat_row in collection.flatten(&entry.record) {
            let Some(flat) = collection.flat_collection(&flat_row.model_path) else {
                continue;
            };
            let mut row = Row::new();
            for (column, value) in flat_row.row {
                if flat.has_field(&column) {
                    row.insert(column, value);
                } else {
                    dropped.push(path::join(&flat_row.model_path, &path::unescape(&column)));
                }
            }
            rows.push((flat.name().to_string(), row));
        }

        if !dropped.is_empty() {
            warn!(collection = %entry.collection, fields = ?dropped, "dropping unknown fields");
            stats.fields_dropped += dropped.len() as u64;
        }

        Some(PreparedEntry {
            collection,
            id,
            rows,
        })
    }
}

/// Deletes of every virtual row below the root row `id`.
fn child_deletes(collection: &ResolvedCollection, id: &Value) -> Vec<TableOp> {
    let top_level = collection.options.top_level_models();
    if top_level.is_empty() {
        return Vec::new();
    }

    let prefix = path::render_id(id);
    let filter = Filter::Or(
        top_level
            .iter()
            .flat_map(|model| {
                let base = format!("{prefix}.{model}");
                [
                    Filter::starts_with(FID, format!("{base}.")),
                    Filter::eq(FID, base),
                ]
            })
            .collect(),
    );

    collection
        .virtual_collections()
        .map(|flat| TableOp::Delete {
            table: flat.name().to_string(),
            filter: filter.clone(),
        })
        .collect()
}

/// Groups rows into one upsert per table, tables in first-seen order.
fn upserts(rows: Vec<(String, Row)>) -> Vec<TableOp> {
    let mut tables: Vec<(String, Vec<Row>)> = Vec::new();
    for (table, row) in rows {
        match tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, rows)) => rows.push(row),
            None => tables.push((table, vec![row])),
        }
    }
    tables
        .into_iter()
        .map(|(table, rows)| TableOp::Upsert { table, rows })
        .collect()
}

impl std::fmt::Debug for CacheTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTarget")
            .field("collections", &self.schema.flat_collections().count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::FlattenMode;
    use crate::schema::{CollectionSchema, Field, FieldMap, LeafField};
    use replicadb_storage::{row_from, ColumnType, InMemoryTableStore};
    use serde_json::json;

    fn entry(collection: &str, value: Value) -> Entry {
        Entry::from_value(collection, value).unwrap()
    }

    fn setup() -> (Arc<InMemoryTableStore>, CacheTarget) {
        let root = CollectionSchema::new("root", FieldMap::new())
            .with_field("id", LeafField::new(ColumnType::Number).primary_key())
            .with_field("tags", Field::array(Field::leaf(ColumnType::String)));
        let schema = ResolvedSchema::resolve(vec![root], &FlattenMode::Auto).unwrap();
        let store = Arc::new(InMemoryTableStore::new());
        let target = CacheTarget::new(store.clone(), Arc::new(schema));
        target.create_tables().unwrap();
        (store, target)
    }

    fn rows(store: &InMemoryTableStore, table: &str) -> Vec<Row> {
        store.query(table, &Query::all()).unwrap()
    }

    #[test]
    fn dump_writes_flattened_rows() {
        let (store, target) = setup();
        let stats = target
            .apply_dump(&[entry("root", json!({"id": 1, "tags": ["a", "b"]}))], true)
            .unwrap();

        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.rows_written, 3);
        assert_eq!(rows(&store, "root"), vec![row_from(json!({"id": 1}))]);
        assert_eq!(
            rows(&store, "root_tags"),
            vec![
                row_from(json!({"_fid": "1.tags.0", "_fpid": 1, "value": "a"})),
                row_from(json!({"_fid": "1.tags.1", "_fpid": 1, "value": "b"})),
            ]
        );
    }

    #[test]
    fn first_page_replaces_previous_contents() {
        let (store, target) = setup();
        target
            .apply_dump(&[entry("root", json!({"id": 1, "tags": ["a"]}))], true)
            .unwrap();
        target
            .apply_dump(&[entry("root", json!({"id": 2}))], true)
            .unwrap();
        target
            .apply_dump(&[entry("root", json!({"id": 3}))], false)
            .unwrap();

        let ids: Vec<_> = rows(&store, "root").into_iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
        assert!(rows(&store, "root_tags").is_empty());
    }

    #[test]
    fn unknown_collections_and_fields_are_skipped() {
        let (store, target) = setup();
        let stats = target
            .apply_dump(
                &[
                    entry("other", json!({"id": 1})),
                    entry("root", json!({"nope": 1})),
                    entry("root", json!({"tags": ["x"]})),
                    entry("root", json!({"id": 4, "extra": true})),
                ],
                true,
            )
            .unwrap();

        assert_eq!(stats.entries_skipped, 3);
        assert_eq!(stats.entries_applied, 1);
        assert_eq!(stats.fields_dropped, 1);
        assert_eq!(rows(&store, "root"), vec![row_from(json!({"id": 4}))]);
    }

    #[test]
    fn delta_delete_removes_children_and_root() {
        let (store, target) = setup();
        target
            .apply_dump(
                &[
                    entry("root", json!({"id": 1, "tags": ["a", "b"]})),
                    entry("root", json!({"id": 12, "tags": ["c"]})),
                ],
                true,
            )
            .unwrap();

        let stats = target
            .apply_delta(&DeltaBatch::new(
                vec![],
                vec![entry("root", json!({"id": 1}))],
                None,
            ))
            .unwrap();

        assert_eq!(stats.rows_deleted, 3);
        assert_eq!(rows(&store, "root"), vec![row_from(json!({"id": 12}))]);
        assert_eq!(
            rows(&store, "root_tags"),
            vec![row_from(json!({"_fid": "12.tags.0", "_fpid": 12, "value": "c"}))]
        );
    }

    #[test]
    fn delta_update_replaces_subtree() {
        let (store, target) = setup();
        target
            .apply_dump(&[entry("root", json!({"id": 1, "tags": ["a", "b", "c"]}))], true)
            .unwrap();

        target
            .apply_delta(&DeltaBatch::new(
                vec![entry("root", json!({"id": 1, "tags": ["z"]}))],
                vec![],
                Some(json!(1)),
            ))
            .unwrap();

        assert_eq!(
            rows(&store, "root_tags"),
            vec![row_from(json!({"_fid": "1.tags.0", "_fpid": 1, "value": "z"}))]
        );
    }

    #[test]
    fn delete_by_non_key_predicate_resolves_ids() {
        let root = CollectionSchema::new("users", FieldMap::new())
            .with_field("id", LeafField::new(ColumnType::String).primary_key())
            .with_field("team", Field::leaf(ColumnType::String))
            .with_field("tags", Field::array(Field::leaf(ColumnType::String)));
        let schema = ResolvedSchema::resolve(vec![root], &FlattenMode::Auto).unwrap();
        let store = Arc::new(InMemoryTableStore::new());
        let target = CacheTarget::new(store.clone(), Arc::new(schema));
        target.create_tables().unwrap();

        target
            .apply_dump(
                &[
                    entry("users", json!({"id": "a", "team": "red", "tags": ["x"]})),
                    entry("users", json!({"id": "b", "team": "blue", "tags": ["y"]})),
                ],
                true,
            )
            .unwrap();
        target
            .apply_delta(&DeltaBatch::new(
                vec![],
                vec![entry("users", json!({"team": "red"}))],
                None,
            ))
            .unwrap();

        assert_eq!(rows(&store, "users").len(), 1);
        assert_eq!(
            rows(&store, "users_tags"),
            vec![row_from(json!({"_fid": "b.tags.0", "_fpid": "b", "value": "y"}))]
        );
    }

    #[test]
    fn applying_same_dump_twice_is_idempotent() {
        let (store, target) = setup();
        let page = [
            entry("root", json!({"id": 1, "tags": ["a"]})),
            entry("root", json!({"id": 2, "tags": []})),
        ];
        target.apply_dump(&page, true).unwrap();
        let once = (rows(&store, "root"), rows(&store, "root_tags"));
        target.apply_dump(&page, true).unwrap();
        assert_eq!((rows(&store, "root"), rows(&store, "root_tags")), once);
    }

    #[test]
    fn readers_never_see_a_partial_batch() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (store, target) = setup();
        let page = [
            entry("root", json!({"id": 1, "tags": ["a", "b"]})),
            entry("root", json!({"id": 2, "tags": ["c"]})),
        ];
        target.apply_dump(&page, true).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    assert_eq!(store.count("root", &Filter::All).unwrap(), 2);
                    assert_eq!(store.count("root_tags", &Filter::All).unwrap(), 3);
                }
            })
        };

        for round in 0..200 {
            if round % 2 == 0 {
                target.apply_dump(&page, true).unwrap();
            } else {
                let tags = if round % 4 == 1 { json!(["x", "y"]) } else { json!(["a", "b"]) };
                target
                    .apply_delta(&DeltaBatch::new(
                        vec![entry("root", json!({"id": 1, "tags": tags}))],
                        vec![],
                        None,
                    ))
                    .unwrap();
            }
        }
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
    }

    #[test]
    fn drop_tables_removes_flat_tables() {
        let (store, target) = setup();
        target.drop_tables().unwrap();
        assert!(store.table_names().unwrap().is_empty());
    }
}
