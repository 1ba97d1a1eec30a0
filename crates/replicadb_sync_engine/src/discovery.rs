//! Schema installation and first-run discovery.

use crate::error::SyncResult;
use replicadb_core::flatten::{FlattenMode, ResolvedSchema};
use replicadb_core::schema::CollectionSchema;
use replicadb_core::{
    ApplyStats, CacheTarget, MetadataStore, PendingOperation, PendingOperationLog, SchemaAnalyzer,
    StartupState, FLAT_SCHEMA_KEY, SCHEMA_KEY,
};
use replicadb_storage::TableStore;
use replicadb_sync_protocol::{DeltaBatch, Entry};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves `schemas`, reconciles the physical tables with the persisted
/// flat schema and returns a target writing them.
///
/// When the flat schema differs from the persisted one, the previous tables
/// are dropped and the sync state is reset so the next start dumps again.
pub(crate) fn install_schema(
    store: Arc<dyn TableStore>,
    metadata: &MetadataStore,
    schemas: Vec<CollectionSchema>,
    mode: &FlattenMode,
) -> SyncResult<Arc<CacheTarget>> {
    let resolved = Arc::new(ResolvedSchema::resolve(schemas, mode)?);
    let flat = resolved.flat_schemas();
    let previous: Option<Vec<CollectionSchema>> = metadata.get(FLAT_SCHEMA_KEY)?;

    if let Some(previous) = previous.as_ref().filter(|p| **p != flat) {
        info!(
            previous = previous.len(),
            current = flat.len(),
            "schema changed, dropping cached tables"
        );
        for collection in previous {
            store.drop_table(&collection.name)?;
        }
        metadata.set_dump_state(None)?;
        metadata.set_delta_state(None)?;
        metadata.set_startup_state(StartupState::Pending)?;
    }

    let target = Arc::new(CacheTarget::new(store, resolved.clone()));
    target.create_tables()?;
    if previous.as_ref() != Some(&flat) {
        metadata.set(SCHEMA_KEY, &resolved.root_schemas())?;
        metadata.set(FLAT_SCHEMA_KEY, &flat)?;
    }
    Ok(target)
}

/// Discovery of a schema from producer data.
///
/// Batches seen before the schema is known are logged so they can be
/// replayed into the cache once it exists.
pub(crate) struct Discovery {
    analyzer: SchemaAnalyzer,
    log: PendingOperationLog,
    mode: FlattenMode,
}

impl Discovery {
    /// Starts discovery, feeding back operations logged by earlier runs.
    pub(crate) fn resume(log: PendingOperationLog, mode: FlattenMode) -> SyncResult<Self> {
        let mut analyzer = SchemaAnalyzer::new();
        let operations = log.list()?;
        for operation in &operations {
            match operation {
                PendingOperation::Dump { entries, .. } => analyzer.observe_entries(entries),
                PendingOperation::Delta(batch) => analyzer.observe_batch(batch),
            }
        }
        if !operations.is_empty() {
            info!(operations = operations.len(), "resuming schema discovery");
        }
        Ok(Self {
            analyzer,
            log,
            mode,
        })
    }

    /// Logs and analyzes a dump page.
    pub(crate) fn observe_dump(&mut self, entries: &[Entry], first_page: bool) -> SyncResult<()> {
        if first_page {
            // A new dump supersedes everything logged before it.
            self.log.truncate()?;
            self.analyzer = SchemaAnalyzer::new();
        }
        self.log.append(&PendingOperation::Dump {
            entries: entries.to_vec(),
            first_page,
        })?;
        self.analyzer.observe_entries(entries);
        Ok(())
    }

    /// Logs and analyzes a delta batch.
    pub(crate) fn observe_delta(&mut self, batch: &DeltaBatch) -> SyncResult<()> {
        self.log.append(&PendingOperation::Delta(batch.clone()))?;
        self.analyzer.observe_batch(batch);
        Ok(())
    }

    /// Returns true once at least one record was observed.
    pub(crate) fn has_samples(&self) -> bool {
        !self.analyzer.is_empty()
    }

    /// Infers the schema, installs it, replays the log and truncates it.
    pub(crate) fn complete(
        &self,
        store: Arc<dyn TableStore>,
        metadata: &MetadataStore,
    ) -> SyncResult<(Arc<CacheTarget>, ApplyStats)> {
        let schemas = self.analyzer.finish()?;
        info!(
            collections = schemas.len(),
            samples = self.analyzer.samples(),
            "schema discovered"
        );
        let target = install_schema(store, metadata, schemas, &self.mode)?;

        let mut stats = ApplyStats::default();
        for operation in self.log.list()? {
            stats += match operation {
                PendingOperation::Dump {
                    entries,
                    first_page,
                } => target.apply_dump(&entries, first_page)?,
                PendingOperation::Delta(batch) => target.apply_delta(&batch)?,
            };
        }
        self.log.truncate()?;
        debug!(rows = stats.rows_written, "replayed pending operations");
        Ok((target, stats))
    }
}
