//! Synchronization scheduler.
//!
//! One worker task per replica drains a set of trigger slots, always in the
//! same priority order: pushed deltas, then dumps, then pulled deltas. Each
//! slot collects every request made while it waits, so a burst of callers
//! is served by one producer round-trip. Callers hold a [`SyncTicket`] that
//! resolves once their batch has been applied, whether it succeeded or not.
//!
//! ## Key Invariants
//!
//! - Exactly one job runs at a time; the cache has a single writer
//! - A cursor is persisted only after the data it covers is applied
//! - Handler failures stop the current job; the next trigger resumes from
//!   the last persisted cursor
//! - Requests queued while a job runs are served by the next job, never
//!   dropped
//! - A panicking job fails its callers; the worker keeps serving

use crate::config::parse_schedule;
use crate::discovery::Discovery;
use crate::error::{SyncError, SyncResult};
use crate::handler::{DeltaHandler, DeltaRequest, DumpHandler, DumpRequest, Producer};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use replicadb_core::{ApplyStats, CacheReader, CacheTarget, MetadataStore, StartupState};
use replicadb_storage::TableStore;
use replicadb_sync_protocol::{
    DeltaBatch, Entry, PullDumpResponse, ReasonKind, TriggerReason,
};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Cache target shared by the worker and the write path; empty until the
/// schema is known.
pub(crate) type SharedTarget = Arc<RwLock<Option<Arc<CacheTarget>>>>;

/// Kind of synchronization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Apply a batch handed over by a push handler.
    PushDelta,
    /// Pull a full snapshot.
    PullDump,
    /// Pull incremental changes.
    PullDelta,
}

impl JobKind {
    fn as_str(self) -> &'static str {
        match self {
            JobKind::PushDelta => "push-delta",
            JobKind::PullDump => "pull-dump",
            JobKind::PullDelta => "pull-delta",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about sync jobs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Dumps that reached their final page.
    pub dumps_completed: u64,
    /// Pulled deltas that drained the producer.
    pub deltas_completed: u64,
    /// Pushed batches applied.
    pub pushes_applied: u64,
    /// Jobs that stopped on an error.
    pub failures: u64,
    /// Entries applied to the cache.
    pub entries_applied: u64,
    /// Completion time of the last successful job.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Error of the last failed job, cleared by the next success.
    pub last_error: Option<String>,
}

/// Result of one job, shared by every caller it served.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Job that ran.
    pub kind: JobKind,
    /// Whether the job ran to completion.
    pub success: bool,
    /// Number of requests the job served.
    pub reasons: usize,
    /// Handler calls made.
    pub handler_calls: u32,
    /// What was written to the cache.
    pub applied: ApplyStats,
    /// Why the job stopped early.
    pub error: Option<String>,
    /// Duration of the job.
    pub duration: Duration,
}

impl SyncCycleResult {
    fn new(kind: JobKind, reasons: usize) -> Self {
        Self {
            kind,
            success: false,
            reasons,
            handler_calls: 0,
            applied: ApplyStats::default(),
            error: None,
            duration: Duration::ZERO,
        }
    }
}

type Waiter = oneshot::Sender<SyncResult<SyncCycleResult>>;

/// Resolves when the job serving a request has finished.
///
/// The request is queued when the ticket is created; dropping the ticket
/// does not cancel it.
#[derive(Debug)]
pub struct SyncTicket {
    rx: oneshot::Receiver<SyncResult<SyncCycleResult>>,
}

impl SyncTicket {
    fn shut_down() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(SyncError::Shutdown));
        Self { rx }
    }
}

impl Future for SyncTicket {
    type Output = SyncResult<SyncCycleResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(SyncError::Shutdown)))
    }
}

#[derive(Default)]
struct PullSlot {
    reasons: Vec<TriggerReason>,
    waiters: Vec<Waiter>,
}

impl PullSlot {
    fn push(&mut self, reason: TriggerReason, waiter: Waiter) {
        self.reasons.push(reason);
        self.waiters.push(waiter);
    }

    fn absorb(&mut self, other: PullSlot) {
        self.reasons.extend(other.reasons);
        self.waiters.extend(other.waiters);
    }
}

struct PushSlot {
    batch: DeltaBatch,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct Slots {
    push: Option<PushSlot>,
    dump: Option<PullSlot>,
    delta: Option<PullSlot>,
    debounced: Option<PullSlot>,
}

enum Job {
    Push(DeltaBatch),
    Dump(Vec<TriggerReason>),
    Delta(Vec<TriggerReason>),
}

impl Job {
    fn kind(&self) -> JobKind {
        match self {
            Job::Push(_) => JobKind::PushDelta,
            Job::Dump(_) => JobKind::PullDump,
            Job::Delta(_) => JobKind::PullDelta,
        }
    }

    fn reasons(&self) -> usize {
        match self {
            Job::Push(_) => 1,
            Job::Dump(reasons) | Job::Delta(reasons) => reasons.len(),
        }
    }
}

impl Slots {
    fn next(&mut self) -> Option<(Job, Vec<Waiter>)> {
        if let Some(slot) = self.push.take() {
            return Some((Job::Push(slot.batch), slot.waiters));
        }
        if let Some(slot) = self.dump.take() {
            return Some((Job::Dump(slot.reasons), slot.waiters));
        }
        self.delta
            .take()
            .map(|slot| (Job::Delta(slot.reasons), slot.waiters))
    }

    fn drain_waiters(&mut self) -> Vec<Waiter> {
        let mut waiters = Vec::new();
        if let Some(slot) = self.push.take() {
            waiters.extend(slot.waiters);
        }
        for slot in [self.dump.take(), self.delta.take(), self.debounced.take()]
            .into_iter()
            .flatten()
        {
            waiters.extend(slot.waiters);
        }
        waiters
    }
}

/// State shared by the worker, the public handle, sinks and timers.
pub(crate) struct Shared {
    slots: Mutex<Slots>,
    notify: Notify,
    running: AtomicBool,
    shutdown: AtomicBool,
    stats: RwLock<SyncStats>,
    runtime: Handle,
}

impl Shared {
    fn new(runtime: Handle) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            notify: Notify::new(),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            runtime,
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn enqueue(
        &self,
        select: impl FnOnce(&mut Slots) -> &mut Option<PullSlot>,
        reason: TriggerReason,
    ) -> SyncTicket {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.lock();
            if self.is_shut_down() {
                return SyncTicket::shut_down();
            }
            select(&mut *slots)
                .get_or_insert_with(PullSlot::default)
                .push(reason, tx);
        }
        self.notify.notify_one();
        SyncTicket { rx }
    }

    fn enqueue_dump(&self, reason: TriggerReason) -> SyncTicket {
        self.enqueue(|slots| &mut slots.dump, reason)
    }

    fn enqueue_delta(&self, reason: TriggerReason) -> SyncTicket {
        self.enqueue(|slots| &mut slots.delta, reason)
    }

    fn enqueue_debounced(self: &Arc<Self>, reason: TriggerReason, delay: Duration) -> SyncTicket {
        let (tx, rx) = oneshot::channel();
        let start_timer = {
            let mut slots = self.slots.lock();
            if self.is_shut_down() {
                return SyncTicket::shut_down();
            }
            let start_timer = slots.debounced.is_none();
            slots
                .debounced
                .get_or_insert_with(PullSlot::default)
                .push(reason, tx);
            start_timer
        };
        if start_timer {
            let shared = Arc::clone(self);
            self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                shared.promote_debounced();
            });
        }
        SyncTicket { rx }
    }

    fn promote_debounced(&self) {
        {
            let mut slots = self.slots.lock();
            let Some(waiting) = slots.debounced.take() else {
                return;
            };
            if self.is_shut_down() {
                for waiter in waiting.waiters {
                    let _ = waiter.send(Err(SyncError::Shutdown));
                }
                return;
            }
            debug!(reasons = waiting.reasons.len(), "debounce window closed");
            slots
                .delta
                .get_or_insert_with(PullSlot::default)
                .absorb(waiting);
        }
        self.notify.notify_one();
    }

    fn enqueue_push(&self, batch: DeltaBatch) -> SyncTicket {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.lock();
            if self.is_shut_down() {
                return SyncTicket::shut_down();
            }
            match slots.push.as_mut() {
                Some(slot) => {
                    slot.batch.merge(batch);
                    slot.waiters.push(tx);
                }
                None => {
                    slots.push = Some(PushSlot {
                        batch,
                        waiters: vec![tx],
                    })
                }
            }
        }
        self.notify.notify_one();
        SyncTicket { rx }
    }

    fn record(&self, result: &SyncCycleResult) {
        let mut stats = self.stats.write();
        stats.entries_applied += result.applied.entries_applied;
        if result.success {
            match result.kind {
                JobKind::PushDelta => stats.pushes_applied += 1,
                JobKind::PullDump => stats.dumps_completed += 1,
                JobKind::PullDelta => stats.deltas_completed += 1,
            }
            stats.last_sync_time = Some(Utc::now());
            stats.last_error = None;
        } else {
            stats.failures += 1;
            stats.last_error = result.error.clone();
        }
    }

    fn fail_pending(&self) {
        let waiters = self.slots.lock().drain_waiters();
        for waiter in waiters {
            let _ = waiter.send(Err(SyncError::Shutdown));
        }
    }
}

/// Hands pushed change batches to the scheduler.
///
/// Push handlers receive one at registration and may keep it for as long
/// as they like.
#[derive(Clone)]
pub struct DeltaSink {
    shared: Arc<Shared>,
}

impl DeltaSink {
    /// Queues `batch`; the ticket resolves once it has been applied.
    ///
    /// Batches sent while the scheduler is busy are merged in order.
    pub fn send(&self, batch: DeltaBatch) -> SyncTicket {
        self.shared.enqueue_push(batch)
    }
}

impl fmt::Debug for DeltaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaSink").finish_non_exhaustive()
    }
}

/// Everything the worker needs to run jobs.
pub(crate) struct WorkerContext {
    pub(crate) namespace: String,
    pub(crate) producer: Producer,
    pub(crate) store: Arc<dyn TableStore>,
    pub(crate) metadata: MetadataStore,
    pub(crate) target: SharedTarget,
    pub(crate) discovery: Option<Discovery>,
}

struct SyncWorker {
    shared: Arc<Shared>,
    namespace: String,
    producer: Producer,
    store: Arc<dyn TableStore>,
    metadata: MetadataStore,
    reader: CacheReader,
    target: SharedTarget,
    discovery: Option<Discovery>,
}

impl SyncWorker {
    async fn run(mut self) {
        debug!(namespace = %self.namespace, "sync worker started");
        loop {
            if self.shared.is_shut_down() {
                break;
            }
            let next = self.shared.slots.lock().next();
            match next {
                Some((job, waiters)) => {
                    self.shared.running.store(true, Ordering::SeqCst);
                    self.execute(job, waiters).await;
                    self.shared.running.store(false, Ordering::SeqCst);
                }
                None => self.shared.notify.notified().await,
            }
        }
        self.shared.fail_pending();
        debug!(namespace = %self.namespace, "sync worker stopped");
    }

    async fn execute(&mut self, job: Job, waiters: Vec<Waiter>) {
        let kind = job.kind();
        let reasons = job.reasons();
        let result = match AssertUnwindSafe(self.run_job(job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    namespace = %self.namespace,
                    job = %kind,
                    panic = message,
                    "sync job panicked"
                );
                let mut result = SyncCycleResult::new(kind, reasons);
                result.error = Some(format!("sync job panicked: {message}"));
                result
            }
        };
        self.shared.record(&result);
        for waiter in waiters {
            let _ = waiter.send(Ok(result.clone()));
        }
    }

    async fn run_job(&mut self, job: Job) -> SyncCycleResult {
        match job {
            Job::Push(batch) => self.run_push_delta(&batch),
            Job::Dump(reasons) => self.run_pull_dump(reasons).await,
            Job::Delta(reasons) => self.run_pull_delta(reasons).await,
        }
    }

    fn current_target(&self) -> Option<Arc<CacheTarget>> {
        self.target.read().clone()
    }

    fn finish(
        &self,
        mut result: SyncCycleResult,
        outcome: SyncResult<()>,
        started: Instant,
    ) -> SyncCycleResult {
        result.duration = started.elapsed();
        match outcome {
            Ok(()) => result.success = true,
            Err(e) => {
                warn!(
                    namespace = %self.namespace,
                    job = %result.kind,
                    error = %e,
                    "sync job stopped"
                );
                result.error = Some(e.to_string());
            }
        }
        result
    }

    #[instrument(skip_all, fields(namespace = %self.namespace, reasons = reasons.len()))]
    async fn run_pull_dump(&mut self, reasons: Vec<TriggerReason>) -> SyncCycleResult {
        let started = Instant::now();
        let mut result = SyncCycleResult::new(JobKind::PullDump, reasons.len());
        let outcome = match self.producer.dump.clone() {
            Some(handler) => {
                self.pull_dump_pages(handler.as_ref(), &reasons, &mut result)
                    .await
            }
            None => Err(SyncError::invalid_config("no dump handler")),
        };
        self.finish(result, outcome, started)
    }

    async fn pull_dump_pages(
        &mut self,
        handler: &dyn DumpHandler,
        reasons: &[TriggerReason],
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let mut state = self.metadata.dump_state()?;
        let mut first_page = state.is_none();
        if first_page {
            info!("starting dump");
        } else {
            info!("resuming interrupted dump");
        }
        self.metadata.set_startup_state(StartupState::InProgress)?;

        loop {
            let request = DumpRequest {
                previous_dump_state: state.clone(),
                cache: self.reader.clone(),
                reasons: reasons.to_vec(),
            };
            let page = handler.pull_dump(request).await?;
            result.handler_calls += 1;
            result.applied += self.apply_dump_page(page.entries(), first_page)?;
            debug!(
                page = result.handler_calls,
                entries = page.entries().len(),
                more = page.has_more(),
                "dump page applied"
            );
            first_page = false;

            match page {
                PullDumpResponse::More {
                    next_dump_state, ..
                } => {
                    self.metadata.set_dump_state(Some(&next_dump_state))?;
                    state = Some(next_dump_state);
                }
                PullDumpResponse::Done {
                    next_delta_state, ..
                } => {
                    self.metadata.set_dump_state(None)?;
                    if let Some(cursor) = next_delta_state {
                        self.metadata.set_delta_state(Some(&cursor))?;
                    }
                    self.metadata.set_startup_state(StartupState::Done)?;
                    result.applied += self.complete_discovery()?;
                    info!(pages = result.handler_calls, "dump completed");
                    return Ok(());
                }
            }
        }
    }

    #[instrument(skip_all, fields(namespace = %self.namespace, reasons = reasons.len()))]
    async fn run_pull_delta(&mut self, reasons: Vec<TriggerReason>) -> SyncCycleResult {
        let started = Instant::now();
        let mut result = SyncCycleResult::new(JobKind::PullDelta, reasons.len());
        let outcome = match self.producer.delta.clone() {
            Some(handler) => {
                self.pull_delta_batches(handler.as_ref(), &reasons, &mut result)
                    .await
            }
            None => Err(SyncError::invalid_config("no delta handler")),
        };
        self.finish(result, outcome, started)
    }

    async fn pull_delta_batches(
        &mut self,
        handler: &dyn DeltaHandler,
        reasons: &[TriggerReason],
        result: &mut SyncCycleResult,
    ) -> SyncResult<()> {
        let affected_collections = TriggerReason::affected_union(reasons);
        loop {
            let request = DeltaRequest {
                previous_delta_state: self.metadata.delta_state()?,
                cache: self.reader.clone(),
                affected_collections: affected_collections.clone(),
                reasons: reasons.to_vec(),
            };
            let response = handler.pull_delta(request).await?;
            result.handler_calls += 1;
            let more = response.more;
            let batch = DeltaBatch::from(response);
            result.applied += self.apply_delta_batch(&batch)?;
            self.metadata
                .set_delta_state(batch.next_delta_state.as_ref())?;
            debug!(batch = result.handler_calls, entries = batch.len(), more, "delta applied");
            if !more {
                break;
            }
        }
        result.applied += self.complete_discovery()?;
        Ok(())
    }

    #[instrument(skip_all, fields(namespace = %self.namespace, entries = batch.len()))]
    fn run_push_delta(&mut self, batch: &DeltaBatch) -> SyncCycleResult {
        let started = Instant::now();
        let mut result = SyncCycleResult::new(JobKind::PushDelta, 1);
        let outcome = self.apply_delta_batch(batch).and_then(|stats| {
            result.applied += stats;
            if let Some(cursor) = batch.next_delta_state.as_ref().filter(|c| !c.is_null()) {
                self.metadata.set_delta_state(Some(cursor))?;
            }
            Ok(())
        });
        self.finish(result, outcome, started)
    }

    fn apply_dump_page(&mut self, entries: &[Entry], first_page: bool) -> SyncResult<ApplyStats> {
        if let Some(target) = self.current_target() {
            return Ok(target.apply_dump(entries, first_page)?);
        }
        match self.discovery.as_mut() {
            Some(discovery) => {
                discovery.observe_dump(entries, first_page)?;
                Ok(ApplyStats::default())
            }
            None => Err(SyncError::SchemaUnavailable),
        }
    }

    fn apply_delta_batch(&mut self, batch: &DeltaBatch) -> SyncResult<ApplyStats> {
        if let Some(target) = self.current_target() {
            return Ok(target.apply_delta(batch)?);
        }
        match self.discovery.as_mut() {
            Some(discovery) => {
                discovery.observe_delta(batch)?;
                Ok(ApplyStats::default())
            }
            None => Err(SyncError::SchemaUnavailable),
        }
    }

    fn complete_discovery(&mut self) -> SyncResult<ApplyStats> {
        let Some(discovery) = self.discovery.as_ref() else {
            return Ok(ApplyStats::default());
        };
        if !discovery.has_samples() {
            debug!("no records observed yet, schema discovery continues");
            return Ok(ApplyStats::default());
        }
        let (target, stats) = discovery.complete(self.store.clone(), &self.metadata)?;
        *self.target.write() = Some(target);
        self.discovery = None;
        Ok(stats)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct SchedulerInner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    schedules: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
        for task in self.schedules.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Handle to the synchronization worker of one replica.
///
/// Cheap to clone; the worker stops when [`SyncScheduler::shutdown`] is
/// called or the last handle is dropped.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    /// Spawns the worker on the current tokio runtime.
    pub(crate) fn spawn(context: WorkerContext) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            SyncError::invalid_config("the scheduler must be started inside a tokio runtime")
        })?;
        let shared = Arc::new(Shared::new(runtime.clone()));
        let worker = SyncWorker {
            shared: shared.clone(),
            namespace: context.namespace,
            producer: context.producer,
            reader: CacheReader::new(context.store.clone()),
            store: context.store,
            metadata: context.metadata,
            target: context.target,
            discovery: context.discovery,
        };
        let handle = runtime.spawn(worker.run());
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                shared,
                worker: Mutex::new(Some(handle)),
                schedules: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Queues a dump.
    pub fn queue_pull_dump(&self, reason: TriggerReason) -> SyncTicket {
        self.inner.shared.enqueue_dump(reason)
    }

    /// Queues a delta.
    pub fn queue_pull_delta(&self, reason: TriggerReason) -> SyncTicket {
        self.inner.shared.enqueue_delta(reason)
    }

    /// Queues a delta after `delay`, together with every other request
    /// made within the same window.
    pub fn queue_pull_delta_debounced(&self, reason: TriggerReason, delay: Duration) -> SyncTicket {
        self.inner.shared.enqueue_debounced(reason, delay)
    }

    /// Queues a pushed batch.
    pub fn queue_push_delta(&self, batch: DeltaBatch) -> SyncTicket {
        self.inner.shared.enqueue_push(batch)
    }

    /// Returns a sink for push handlers.
    pub fn delta_sink(&self) -> DeltaSink {
        DeltaSink {
            shared: self.inner.shared.clone(),
        }
    }

    /// Triggers `kind` whenever the cron `pattern` fires.
    ///
    /// # Errors
    ///
    /// Returns an error for push jobs and for patterns that do not parse.
    pub fn schedule(&self, kind: JobKind, pattern: &str) -> SyncResult<()> {
        if kind == JobKind::PushDelta {
            return Err(SyncError::invalid_config("push deltas cannot be scheduled"));
        }
        let schedule = parse_schedule(pattern)?;
        let shared = self.inner.shared.clone();
        let task = shared.runtime.spawn({
            let shared = shared.clone();
            async move {
                while let Some(next) = schedule.upcoming(Utc).next() {
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    let reason = TriggerReason::new(ReasonKind::Schedule);
                    let ticket = match kind {
                        JobKind::PullDump => shared.enqueue_dump(reason),
                        _ => shared.enqueue_delta(reason),
                    };
                    if let Err(SyncError::Shutdown) = ticket.await {
                        break;
                    }
                }
            }
        });
        debug!(job = %kind, pattern, "schedule registered");
        self.inner.schedules.lock().push(task);
        Ok(())
    }

    /// Unregisters every cron schedule.
    pub fn stop_schedules(&self) {
        let tasks: Vec<_> = self.inner.schedules.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Number of registered cron schedules.
    pub fn schedule_count(&self) -> usize {
        self.inner.schedules.lock().len()
    }

    /// Returns true while a job is running.
    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::SeqCst)
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.shared.stats.read().clone()
    }

    /// Stops the worker after its current job.
    ///
    /// Queued requests resolve with [`SyncError::Shutdown`].
    pub async fn shutdown(&self) {
        self.inner.shared.shutdown.store(true, Ordering::SeqCst);
        self.inner.shared.notify.notify_one();
        self.stop_schedules();
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }
        self.inner.shared.fail_pending();
    }
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("running", &self.is_running())
            .field("schedules", &self.schedule_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, HandlerResult};
    use async_trait::async_trait;
    use replicadb_core::flatten::FlattenMode;
    use replicadb_storage::InMemoryTableStore;
    use replicadb_sync_protocol::PullDeltaResponse;
    use replicadb_testkit::{record, tagged_schema};
    use serde_json::json;

    struct CountingDelta {
        calls: Mutex<Vec<DeltaRequest>>,
    }

    #[async_trait]
    impl DeltaHandler for CountingDelta {
        async fn pull_delta(&self, request: DeltaRequest) -> HandlerResult<PullDeltaResponse> {
            let mut calls = self.calls.lock();
            calls.push(request);
            Ok(PullDeltaResponse::unchanged(json!(calls.len())))
        }
    }

    struct FailingDelta;

    #[async_trait]
    impl DeltaHandler for FailingDelta {
        async fn pull_delta(&self, _request: DeltaRequest) -> HandlerResult<PullDeltaResponse> {
            Err(HandlerError::new("producer offline"))
        }
    }

    struct PanicsOnce {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl DeltaHandler for PanicsOnce {
        async fn pull_delta(&self, _request: DeltaRequest) -> HandlerResult<PullDeltaResponse> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call == 1 {
                panic!("handler bug");
            }
            Ok(PullDeltaResponse::unchanged(json!(call)))
        }
    }

    struct Harness {
        scheduler: SyncScheduler,
        metadata: MetadataStore,
        store: Arc<dyn TableStore>,
    }

    fn harness(producer: Producer) -> Harness {
        let store: Arc<dyn TableStore> = Arc::new(InMemoryTableStore::new());
        let metadata = MetadataStore::open(store.clone()).unwrap();
        let target = crate::discovery::install_schema(
            store.clone(),
            &metadata,
            vec![tagged_schema("root")],
            &FlattenMode::Auto,
        )
        .unwrap();
        let scheduler = SyncScheduler::spawn(WorkerContext {
            namespace: "test".into(),
            producer,
            store: store.clone(),
            metadata: metadata.clone(),
            target: Arc::new(RwLock::new(Some(target))),
            discovery: None,
        })
        .unwrap();
        Harness {
            scheduler,
            metadata,
            store,
        }
    }

    fn reason(kind: ReasonKind) -> TriggerReason {
        TriggerReason::new(kind).for_collection("root")
    }

    #[tokio::test]
    async fn delta_persists_cursor() {
        let handler = Arc::new(CountingDelta {
            calls: Mutex::new(Vec::new()),
        });
        let Harness {
            scheduler,
            metadata,
            ..
        } = harness(Producer::new().with_delta(handler.clone()));

        let result = scheduler.queue_pull_delta(reason(ReasonKind::Manual)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.handler_calls, 1);
        assert_eq!(metadata.delta_state().unwrap(), Some(json!(1)));

        scheduler.queue_pull_delta(reason(ReasonKind::Manual)).await.unwrap();
        let calls = handler.calls.lock();
        assert_eq!(calls[1].previous_delta_state, Some(json!(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_requests_share_one_call() {
        let handler = Arc::new(CountingDelta {
            calls: Mutex::new(Vec::new()),
        });
        let scheduler = harness(Producer::new().with_delta(handler.clone())).scheduler;

        let delay = Duration::from_millis(100);
        let first = scheduler.queue_pull_delta_debounced(reason(ReasonKind::BeforeList), delay);
        let second =
            scheduler.queue_pull_delta_debounced(reason(ReasonKind::BeforeAggregate), delay);
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap().reasons, 2);
        assert!(second.unwrap().success);
        let calls = handler.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].reasons.len(), 2);
        assert!(calls[0].affected_collections.contains("root"));
    }

    #[tokio::test]
    async fn handler_failure_resolves_waiters() {
        let Harness {
            scheduler,
            metadata,
            ..
        } = harness(Producer::new().with_delta(Arc::new(FailingDelta)));
        metadata.set_delta_state(Some(&json!("c7"))).unwrap();

        let result = scheduler.queue_pull_delta(reason(ReasonKind::Manual)).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("producer offline"));
        assert_eq!(metadata.delta_state().unwrap(), Some(json!("c7")));

        let stats = scheduler.stats();
        assert_eq!(stats.failures, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn panicking_handler_keeps_the_worker_alive() {
        let handler = Arc::new(PanicsOnce {
            calls: Mutex::new(0),
        });
        let scheduler = harness(Producer::new().with_delta(handler)).scheduler;

        let failed = scheduler.queue_pull_delta(reason(ReasonKind::Manual)).await.unwrap();
        assert!(!failed.success);
        assert!(failed.error.unwrap().contains("handler bug"));

        let next = scheduler.queue_pull_delta(reason(ReasonKind::Manual)).await.unwrap();
        assert!(next.success);
        let stats = scheduler.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.deltas_completed, 1);
    }

    #[tokio::test]
    async fn pushed_batches_are_applied() {
        let Harness {
            scheduler,
            metadata,
            store,
        } = harness(Producer::new());
        let batch = DeltaBatch::new(
            vec![Entry::new("root", record(json!({"id": 1, "tags": ["a"]})))],
            vec![],
            Some(json!("p1")),
        );

        let result = scheduler.delta_sink().send(batch).await.unwrap();
        assert!(result.success);
        assert_eq!(result.kind, JobKind::PushDelta);
        assert_eq!(metadata.delta_state().unwrap(), Some(json!("p1")));

        let tags = CacheReader::new(store).collection("root_tags").unwrap();
        assert_eq!(tags.list(&Default::default(), None).unwrap().len(), 1);
        assert_eq!(scheduler.stats().pushes_applied, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_requests() {
        let scheduler = harness(Producer::new()).scheduler;
        scheduler.shutdown().await;

        let result = scheduler.queue_pull_dump(reason(ReasonKind::Manual)).await;
        assert!(matches!(result, Err(SyncError::Shutdown)));
    }

    #[tokio::test]
    async fn push_jobs_cannot_be_scheduled() {
        let scheduler = harness(Producer::new()).scheduler;
        assert!(scheduler.schedule(JobKind::PushDelta, "* * * * *").is_err());
        scheduler.schedule(JobKind::PullDelta, "0 0 * * *").unwrap();
        assert_eq!(scheduler.schedule_count(), 1);
        scheduler.stop_schedules();
        assert_eq!(scheduler.schedule_count(), 0);
    }
}
