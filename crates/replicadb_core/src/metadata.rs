//! Persisted synchronization metadata.
//!
//! Two tables live next to the cached collections of a namespace:
//!
//! - `_metadata`: key/value pairs (`schema`, `flat_schema`, `dump_state`,
//!   `delta_state`, `startup_state`), each value stored as JSON
//! - `_pending_operations`: batches captured before the schema is known,
//!   replayed in id order once discovery completes

use crate::error::{CoreError, CoreResult};
use replicadb_storage::{
    row_from, ColumnDef, ColumnType, Filter, Query, TableSchema, TableStore,
};
use replicadb_sync_protocol::{Cursor, DeltaBatch, Entry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Name of the key/value metadata table.
pub const METADATA_TABLE: &str = "_metadata";

/// Name of the pending operation table.
pub const PENDING_OPERATIONS_TABLE: &str = "_pending_operations";

/// Metadata key of the nested schema.
pub const SCHEMA_KEY: &str = "schema";
/// Metadata key of the resolved, flattened schema.
pub const FLAT_SCHEMA_KEY: &str = "flat_schema";
/// Metadata key of the in-progress dump cursor.
pub const DUMP_STATE_KEY: &str = "dump_state";
/// Metadata key of the delta cursor.
pub const DELTA_STATE_KEY: &str = "delta_state";
/// Metadata key of the startup state.
pub const STARTUP_STATE_KEY: &str = "startup_state";

/// Progress of the initial dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    /// No dump has started.
    #[default]
    Pending,
    /// A dump started but has not finished.
    InProgress,
    /// A dump completed.
    Done,
}

/// Key/value access to the `_metadata` table.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn TableStore>,
}

impl MetadataStore {
    /// Opens the metadata tables, creating them if needed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the tables cannot be created.
    pub fn open(store: Arc<dyn TableStore>) -> CoreResult<Self> {
        if !store.has_table(METADATA_TABLE)? {
            store.create_table(TableSchema::new(
                METADATA_TABLE,
                vec![
                    ColumnDef::new("key", ColumnType::String).primary_key(),
                    ColumnDef::new("value", ColumnType::Json),
                ],
            ))?;
        }
        if !store.has_table(PENDING_OPERATIONS_TABLE)? {
            store.create_table(TableSchema::new(
                PENDING_OPERATIONS_TABLE,
                vec![
                    ColumnDef::new("id", ColumnType::Integer).primary_key(),
                    ColumnDef::new("type", ColumnType::String),
                    ColumnDef::new("content", ColumnType::Json),
                ],
            ))?;
        }
        Ok(Self { store })
    }

    /// Reads and deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CorruptedMetadata`] if the stored value does not
    /// deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let rows = self
            .store
            .query(METADATA_TABLE, &Query::new(Filter::eq("key", key)))?;
        let Some(value) = rows.into_iter().next().and_then(|mut r| r.remove("value")) else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CoreError::CorruptedMetadata {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Serializes and stores a value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> CoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.store
            .upsert(METADATA_TABLE, vec![row_from(json!({"key": key, "value": value}))])?;
        Ok(())
    }

    /// Removes a value.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn remove(&self, key: &str) -> CoreResult<()> {
        self.store.delete(METADATA_TABLE, &Filter::eq("key", key))?;
        Ok(())
    }

    /// Current startup state; `Pending` when never written.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is unreadable.
    pub fn startup_state(&self) -> CoreResult<StartupState> {
        Ok(self.get(STARTUP_STATE_KEY)?.unwrap_or_default())
    }

    /// Stores the startup state.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_startup_state(&self, state: StartupState) -> CoreResult<()> {
        self.set(STARTUP_STATE_KEY, &state)
    }

    /// Cursor of an interrupted dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn dump_state(&self) -> CoreResult<Option<Cursor>> {
        self.get(DUMP_STATE_KEY)
    }

    /// Stores or clears the dump cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_dump_state(&self, state: Option<&Cursor>) -> CoreResult<()> {
        match state {
            Some(state) => self.set(DUMP_STATE_KEY, state),
            None => self.remove(DUMP_STATE_KEY),
        }
    }

    /// Cursor the next delta continues from.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn delta_state(&self) -> CoreResult<Option<Cursor>> {
        self.get(DELTA_STATE_KEY)
    }

    /// Stores or clears the delta cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_delta_state(&self, state: Option<&Cursor>) -> CoreResult<()> {
        match state {
            Some(state) => self.set(DELTA_STATE_KEY, state),
            None => self.remove(DELTA_STATE_KEY),
        }
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

/// A batch captured while the schema was still being discovered.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperation {
    /// A dump page.
    Dump {
        /// Records of the page.
        entries: Vec<Entry>,
        /// Whether this was the first page of its dump.
        first_page: bool,
    },
    /// A pulled or pushed delta batch.
    Delta(DeltaBatch),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpContent {
    entries: Vec<Entry>,
    first_page: bool,
}

impl PendingOperation {
    fn kind(&self) -> &'static str {
        match self {
            PendingOperation::Dump { .. } => "dump",
            PendingOperation::Delta(_) => "delta",
        }
    }

    fn content(&self) -> CoreResult<Value> {
        Ok(match self {
            PendingOperation::Dump {
                entries,
                first_page,
            } => serde_json::to_value(DumpContent {
                entries: entries.clone(),
                first_page: *first_page,
            })?,
            PendingOperation::Delta(batch) => serde_json::to_value(batch)?,
        })
    }

    fn from_parts(kind: &str, content: Value) -> CoreResult<Self> {
        let corrupted = |message: String| CoreError::CorruptedMetadata {
            key: PENDING_OPERATIONS_TABLE.to_string(),
            message,
        };
        match kind {
            "dump" => {
                let content: DumpContent =
                    serde_json::from_value(content).map_err(|e| corrupted(e.to_string()))?;
                Ok(PendingOperation::Dump {
                    entries: content.entries,
                    first_page: content.first_page,
                })
            }
            "delta" => serde_json::from_value(content)
                .map(PendingOperation::Delta)
                .map_err(|e| corrupted(e.to_string())),
            other => Err(corrupted(format!("unknown operation type {other}"))),
        }
    }
}

/// Append-only log of [`PendingOperation`]s.
#[derive(Clone)]
pub struct PendingOperationLog {
    store: Arc<dyn TableStore>,
}

impl PendingOperationLog {
    /// Creates a log over a store opened with [`MetadataStore::open`].
    #[must_use]
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Appends an operation and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append(&self, operation: &PendingOperation) -> CoreResult<i64> {
        let id = self.last_id()? + 1;
        self.store.insert(
            PENDING_OPERATIONS_TABLE,
            vec![row_from(json!({
                "id": id,
                "type": operation.kind(),
                "content": operation.content()?,
            }))],
        )?;
        Ok(id)
    }

    fn last_id(&self) -> CoreResult<i64> {
        let rows = self
            .store
            .query(PENDING_OPERATIONS_TABLE, &Query::all().with_projection(["id"]))?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0))
    }

    /// All operations in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a row is unreadable.
    pub fn list(&self) -> CoreResult<Vec<PendingOperation>> {
        let mut rows = self.store.query(PENDING_OPERATIONS_TABLE, &Query::all())?;
        rows.sort_by_key(|r| r.get("id").and_then(Value::as_i64).unwrap_or(0));
        rows.into_iter()
            .map(|mut row| {
                let kind = row
                    .remove("type")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let content = row.remove("content").unwrap_or(Value::Null);
                PendingOperation::from_parts(&kind, content)
            })
            .collect()
    }

    /// Number of logged operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn len(&self) -> CoreResult<u64> {
        Ok(self.store.count(PENDING_OPERATIONS_TABLE, &Filter::All)?)
    }

    /// Returns true if nothing is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Removes every logged operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncate fails.
    pub fn truncate(&self) -> CoreResult<()> {
        self.store.truncate(PENDING_OPERATIONS_TABLE)?;
        Ok(())
    }
}

impl std::fmt::Debug for PendingOperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperationLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicadb_storage::InMemoryTableStore;

    fn open() -> (Arc<dyn TableStore>, MetadataStore) {
        let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::new());
        let metadata = MetadataStore::open(store.clone()).unwrap();
        (store, metadata)
    }

    #[test]
    fn open_is_idempotent() {
        let (store, _) = open();
        MetadataStore::open(store.clone()).unwrap();
        assert!(store.has_table(METADATA_TABLE).unwrap());
        assert!(store.has_table(PENDING_OPERATIONS_TABLE).unwrap());
    }

    #[test]
    fn cursors_round_trip_and_clear() {
        let (_, metadata) = open();
        assert_eq!(metadata.delta_state().unwrap(), None);

        metadata.set_delta_state(Some(&json!({"page": 3}))).unwrap();
        assert_eq!(metadata.delta_state().unwrap(), Some(json!({"page": 3})));

        metadata.set_delta_state(None).unwrap();
        assert_eq!(metadata.delta_state().unwrap(), None);
    }

    #[test]
    fn startup_state_defaults_to_pending() {
        let (_, metadata) = open();
        assert_eq!(metadata.startup_state().unwrap(), StartupState::Pending);
        metadata.set_startup_state(StartupState::InProgress).unwrap();
        assert_eq!(metadata.startup_state().unwrap(), StartupState::InProgress);
        assert_eq!(
            metadata.get::<Value>(STARTUP_STATE_KEY).unwrap(),
            Some(json!("in_progress"))
        );
    }

    #[test]
    fn corrupted_value_is_reported() {
        let (_, metadata) = open();
        metadata.set(STARTUP_STATE_KEY, &json!("sideways")).unwrap();
        assert!(matches!(
            metadata.startup_state(),
            Err(CoreError::CorruptedMetadata { .. })
        ));
    }

    #[test]
    fn pending_log_replays_in_order() {
        let (store, _) = open();
        let log = PendingOperationLog::new(store);
        let entry = Entry::from_value("users", json!({"id": 1})).unwrap();

        let first = log
            .append(&PendingOperation::Dump {
                entries: vec![entry.clone()],
                first_page: true,
            })
            .unwrap();
        let second = log
            .append(&PendingOperation::Delta(DeltaBatch::new(
                vec![],
                vec![entry.clone()],
                Some(json!(9)),
            )))
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let ops = log.list().unwrap();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], PendingOperation::Dump { first_page: true, .. }));
        assert_eq!(
            ops[1],
            PendingOperation::Delta(DeltaBatch::new(vec![], vec![entry], Some(json!(9))))
        );

        log.truncate().unwrap();
        assert!(log.is_empty().unwrap());
    }
}
