//! Replica façade: startup, reads and writes.

use crate::config::ReplicaConfig;
use crate::discovery::{install_schema, Discovery};
use crate::error::{SyncError, SyncResult};
use crate::handler::{Producer, PushRequest};
use crate::scheduler::{
    JobKind, SharedTarget, SyncCycleResult, SyncScheduler, SyncTicket, WorkerContext,
};
use crate::write::WriteThrough;
use futures::future::join_all;
use parking_lot::RwLock;
use replicadb_core::flatten::ResolvedSchema;
use replicadb_core::schema::CollectionSchema;
use replicadb_core::{
    AggregateResult, Aggregation, CacheReader, CoreError, MetadataStore, PendingOperationLog,
    StartupState, SCHEMA_KEY,
};
use replicadb_storage::{Filter, TableStore};
use replicadb_sync_protocol::{ReasonKind, Record, TriggerReason};
use std::sync::Arc;
use tracing::{info, warn};

struct ReplicaInner {
    config: ReplicaConfig,
    metadata: MetadataStore,
    reader: CacheReader,
    target: SharedTarget,
    scheduler: SyncScheduler,
    writes: WriteThrough,
}

/// A local, queryable mirror of one producer.
///
/// # Example
///
/// ```rust,no_run
/// use replicadb_sync_engine::{MockProducer, Replica, ReplicaConfig};
/// use replicadb_storage::{Filter, InMemoryTableStore};
/// use std::sync::Arc;
///
/// # async fn run() -> replicadb_sync_engine::SyncResult<()> {
/// let producer = MockProducer::new();
/// let replica = Replica::start(
///     ReplicaConfig::new("crm").with_pull_dump_on_restart(true),
///     producer.producer(),
///     Arc::new(InMemoryTableStore::new()),
/// )
/// .await?;
///
/// let users = replica.collection("users")?.list(&Filter::All, None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Replica {
    inner: Arc<ReplicaInner>,
}

impl Replica {
    /// Validates the configuration, prepares the cache and starts syncing.
    ///
    /// Startup dumps and deltas have been applied, or have failed and been
    /// logged, by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the configuration does not match
    /// the producer or the schema cannot be resolved, and a cache error when
    /// the metadata cannot be read.
    pub async fn start(
        config: ReplicaConfig,
        producer: Producer,
        store: Arc<dyn TableStore>,
    ) -> SyncResult<Self> {
        config.validate(&producer)?;
        let metadata = MetadataStore::open(store.clone())?;
        let reader = CacheReader::new(store.clone());
        let target: SharedTarget = Arc::new(RwLock::new(None));

        let known_schema = match &config.schema {
            Some(schema) => Some(schema.clone()),
            None => metadata.get::<Vec<CollectionSchema>>(SCHEMA_KEY)?,
        };
        let discovery = match known_schema {
            Some(schema) => {
                let installed =
                    install_schema(store.clone(), &metadata, schema, &config.flatten_mode)?;
                *target.write() = Some(installed);
                None
            }
            None => {
                info!(namespace = %config.name, "no schema yet, discovering from producer data");
                Some(Discovery::resume(
                    PendingOperationLog::new(store.clone()),
                    config.flatten_mode.clone(),
                )?)
            }
        };

        let scheduler = SyncScheduler::spawn(WorkerContext {
            namespace: config.name.clone(),
            producer: producer.clone(),
            store: store.clone(),
            metadata: metadata.clone(),
            target: target.clone(),
            discovery,
        })?;

        if let Some(push) = producer.push.clone() {
            push.register(
                PushRequest::new(reader.clone(), metadata.clone()),
                scheduler.delta_sink(),
            )
            .await?;
        }
        for pattern in &config.pull_dump_schedules {
            scheduler.schedule(JobKind::PullDump, pattern)?;
        }
        for pattern in &config.pull_delta_schedules {
            scheduler.schedule(JobKind::PullDelta, pattern)?;
        }

        let mut startup: Vec<SyncTicket> = Vec::new();
        let dump_pending = metadata.startup_state()? != StartupState::Done;
        if producer.has_dump() && (config.pull_dump_on_restart || dump_pending) {
            startup.push(scheduler.queue_pull_dump(TriggerReason::new(ReasonKind::Startup)));
        }
        if producer.has_delta() && config.pull_delta_on_restart {
            startup.push(scheduler.queue_pull_delta(TriggerReason::new(ReasonKind::Startup)));
        }
        for result in join_all(startup).await {
            let result = result?;
            if !result.success {
                warn!(
                    namespace = %config.name,
                    job = %result.kind,
                    error = result.error.as_deref().unwrap_or_default(),
                    "startup sync did not complete"
                );
            }
        }

        let writes = WriteThrough::new(
            producer,
            target.clone(),
            reader.clone(),
            scheduler.clone(),
            config.pull_delta_on_after_write,
        );
        info!(namespace = %config.name, "replica started");
        Ok(Self {
            inner: Arc::new(ReplicaInner {
                config,
                metadata,
                reader,
                target,
                scheduler,
                writes,
            }),
        })
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The scheduler serving this replica.
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.inner.scheduler
    }

    /// Persisted sync state.
    pub fn metadata(&self) -> &MetadataStore {
        &self.inner.metadata
    }

    /// Read-only access to the cache, bypassing before-access deltas.
    pub fn reader(&self) -> CacheReader {
        self.inner.reader.clone()
    }

    /// The resolved schema, once known.
    pub fn schema(&self) -> Option<Arc<ResolvedSchema>> {
        self.inner
            .target
            .read()
            .as_ref()
            .map(|target| target.schema().clone())
    }

    /// Flat schemas of every cached collection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SchemaUnavailable`] while discovery is running.
    pub fn collections(&self) -> SyncResult<Vec<CollectionSchema>> {
        self.schema()
            .map(|schema| schema.flat_schemas())
            .ok_or(SyncError::SchemaUnavailable)
    }

    /// Returns a handle to one cached collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is unknown or has no such collection.
    pub fn collection(&self, name: &str) -> SyncResult<ReplicaCollection> {
        let schema = self.schema().ok_or(SyncError::SchemaUnavailable)?;
        let flat = schema
            .flat_collection(name)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: name.to_string(),
            })?;
        Ok(ReplicaCollection {
            inner: self.inner.clone(),
            name: name.to_string(),
            root: flat.root.clone(),
        })
    }

    /// Pulls a dump now and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Shutdown`] if the scheduler is stopped.
    pub async fn sync_dump(&self) -> SyncResult<SyncCycleResult> {
        self.inner
            .scheduler
            .queue_pull_dump(TriggerReason::new(ReasonKind::Manual))
            .await
    }

    /// Pulls a delta now and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Shutdown`] if the scheduler is stopped.
    pub async fn sync_delta(&self) -> SyncResult<SyncCycleResult> {
        self.inner
            .scheduler
            .queue_pull_delta(TriggerReason::new(ReasonKind::Manual))
            .await
    }

    /// Stops schedules and the worker.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
        info!(namespace = %self.name(), "replica stopped");
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("name", &self.name())
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

/// One collection of a [`Replica`].
#[derive(Clone)]
pub struct ReplicaCollection {
    inner: Arc<ReplicaInner>,
    name: String,
    root: String,
}

impl ReplicaCollection {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lists records matching `filter`, optionally projected.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read.
    pub async fn list(
        &self,
        filter: &Filter,
        projection: Option<&[&str]>,
    ) -> SyncResult<Vec<Record>> {
        self.before_access(ReasonKind::BeforeList).await?;
        Ok(self
            .inner
            .reader
            .collection(&self.name)?
            .list(filter, projection)?)
    }

    /// Aggregates records matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read.
    pub async fn aggregate(
        &self,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> SyncResult<Vec<AggregateResult>> {
        self.before_access(ReasonKind::BeforeAggregate).await?;
        Ok(self
            .inner
            .reader
            .collection(&self.name)?
            .aggregate(filter, aggregation, limit)?)
    }

    /// Creates records through the producer, then caches them.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] without a create handler and the
    /// handler's error if a call fails; records created before the failure
    /// are cached.
    pub async fn create(&self, records: Vec<Record>) -> SyncResult<Vec<Record>> {
        self.inner.writes.create(&self.name, records).await
    }

    /// Updates every record matching `filter` with `patch`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] without an update handler.
    pub async fn update(&self, filter: &Filter, patch: &Record) -> SyncResult<u64> {
        self.inner.writes.update(&self.name, filter, patch).await
    }

    /// Deletes every record matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unsupported`] without a delete handler.
    pub async fn delete(&self, filter: &Filter) -> SyncResult<u64> {
        self.inner.writes.delete(&self.name, filter).await
    }

    async fn before_access(&self, kind: ReasonKind) -> SyncResult<()> {
        let config = &self.inner.config;
        if !config.pull_delta_on_before_access {
            return Ok(());
        }
        let reason = TriggerReason::new(kind).for_collection(self.root.clone());
        let scheduler = &self.inner.scheduler;
        let ticket = match config.before_access_delay {
            Some(delay) => scheduler.queue_pull_delta_debounced(reason, delay),
            None => scheduler.queue_pull_delta(reason),
        };
        let result = ticket.await?;
        if !result.success {
            warn!(
                collection = %self.name,
                error = result.error.as_deref().unwrap_or_default(),
                "delta before access failed, reading cached data"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplicaCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaCollection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
