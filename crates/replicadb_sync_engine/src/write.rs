//! Write-through of local writes to the producer.
//!
//! Each write goes to the producer first, one handler call per record, and
//! only then to the cache. Afterwards a delta is queued so the cache picks
//! up whatever the producer changed on its side.

use crate::error::{SyncError, SyncResult};
use crate::handler::Producer;
use crate::scheduler::{SharedTarget, SyncScheduler};
use replicadb_core::{CacheReader, CacheTarget, CoreError, RelationGraph};
use replicadb_storage::Filter;
use replicadb_sync_protocol::{DeltaBatch, Entry, ReasonKind, Record, TriggerReason};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct WriteThrough {
    producer: Producer,
    target: SharedTarget,
    reader: CacheReader,
    scheduler: SyncScheduler,
    delta_after_write: bool,
}

impl WriteThrough {
    pub(crate) fn new(
        producer: Producer,
        target: SharedTarget,
        reader: CacheReader,
        scheduler: SyncScheduler,
        delta_after_write: bool,
    ) -> Self {
        Self {
            producer,
            target,
            reader,
            scheduler,
            delta_after_write,
        }
    }

    fn target_for(&self, collection: &str) -> SyncResult<(Arc<CacheTarget>, String)> {
        let target = self
            .target
            .read()
            .clone()
            .ok_or(SyncError::SchemaUnavailable)?;
        let primary_key = target
            .schema()
            .collection(collection)
            .map(|c| c.primary_key.clone())
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        Ok((target, primary_key))
    }

    /// Creates `records`, returning them with producer-assigned fields.
    pub(crate) async fn create(
        &self,
        collection: &str,
        records: Vec<Record>,
    ) -> SyncResult<Vec<Record>> {
        let handler = self
            .producer
            .create
            .clone()
            .ok_or_else(|| unsupported("create", collection))?;
        let (target, _) = self.target_for(collection)?;

        let mut created = Vec::with_capacity(records.len());
        let mut failure = None;
        for mut record in records {
            match handler.create_record(collection, &record).await {
                Ok(assigned) => {
                    if let Some(fields) = assigned {
                        record.extend(fields);
                    }
                    created.push(record);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let entries = created
            .iter()
            .map(|r| Entry::new(collection, r.clone()))
            .collect();
        target.apply_delta(&DeltaBatch::new(entries, Vec::new(), None))?;
        debug!(collection, records = created.len(), "records created");
        self.after_write(ReasonKind::AfterCreate, collection, None);

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(created),
        }
    }

    /// Applies `patch` to every record matching `filter`.
    pub(crate) async fn update(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Record,
    ) -> SyncResult<u64> {
        let handler = self
            .producer
            .update
            .clone()
            .ok_or_else(|| unsupported("update", collection))?;
        let (target, _) = self.target_for(collection)?;
        let rows = self.reader.collection(collection)?.list(filter, None)?;

        let mut updated = Vec::with_capacity(rows.len());
        let mut failure = None;
        for mut row in rows {
            row.extend(patch.clone());
            if let Err(e) = handler.update_record(collection, &row).await {
                failure = Some(e);
                break;
            }
            updated.push(Entry::new(collection, row));
        }

        let count = updated.len() as u64;
        target.apply_delta(&DeltaBatch::new(updated, Vec::new(), None))?;
        debug!(collection, records = count, "records updated");
        self.after_write(ReasonKind::AfterUpdate, collection, None);

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(count),
        }
    }

    /// Deletes every record matching `filter`.
    pub(crate) async fn delete(&self, collection: &str, filter: &Filter) -> SyncResult<u64> {
        let handler = self
            .producer
            .delete
            .clone()
            .ok_or_else(|| unsupported("delete", collection))?;
        let (target, primary_key) = self.target_for(collection)?;
        let rows = self.reader.collection(collection)?.list(filter, None)?;

        let mut deleted = Vec::with_capacity(rows.len());
        let mut failure = None;
        for row in rows {
            if let Err(e) = handler.delete_record(collection, &row).await {
                failure = Some(e);
                break;
            }
            let mut predicate = Record::new();
            if let Some(id) = row.get(&primary_key) {
                predicate.insert(primary_key.clone(), id.clone());
            }
            deleted.push(Entry::new(collection, predicate));
        }

        let count = deleted.len() as u64;
        target.apply_delta(&DeltaBatch::new(Vec::new(), deleted, None))?;
        debug!(collection, records = count, "records deleted");

        let graph = RelationGraph::from_collections(
            target.schema().flat_collections().map(|c| &c.schema),
        );
        let affected = graph.delete_closure(collection);
        self.after_write(ReasonKind::AfterDelete, collection, Some(affected));

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(count),
        }
    }

    fn after_write(&self, kind: ReasonKind, collection: &str, affected: Option<BTreeSet<String>>) {
        if !self.delta_after_write {
            return;
        }
        let mut reason = TriggerReason::new(kind).for_collection(collection);
        if let Some(affected) = affected {
            reason = reason.with_affected(affected);
        }
        // The delta runs on its own; writers do not wait for it.
        drop(self.scheduler.queue_pull_delta(reason));
    }
}

fn unsupported(operation: &'static str, collection: &str) -> SyncError {
    warn!(collection, operation, "write rejected, no handler");
    SyncError::Unsupported {
        operation,
        collection: collection.to_string(),
    }
}
