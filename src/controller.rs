//! Controller session.
//!
//! A [`Controller`] owns everything one running session needs: the record
//! store, the sync backend, the phase clock and the background tasks that
//! connect them.
//!
//! ```text
//!   PhaseClock ──tick_all──▶ IntersectionStore ◀──apply── control / emergency
//!        │                        ▲
//!        └──updated records──▶ writer task ──write──▶ SyncBackend
//!                                 │                      │
//!                                 └──merge── subscriber ◀┘ (remote changes)
//! ```
//!
//! Local state is authoritative: a failed write is retried and then
//! dropped, never rolled back, and the clock keeps running regardless.
//! Records reach the writer in the order the store applied them, and a
//! resync snapshot never replaces a record whose local changes have not
//! reached the shared store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::backend::{RemoteChange, SyncBackend};
use crate::config::SignalConfig;
use crate::error::{ConfigError, ControlError, SignalError, StoreError};
use crate::observability::metrics::{self, WriteOutcome};
use crate::observability::{Event, EventEmitter};
use crate::signal::control::suggest_action;
use crate::signal::intersection::seed_intersections;
use crate::signal::{
    ControlAction, ControlPolicy, EmergencyAction, Intersection, IntersectionId,
    IntersectionRecord, PhaseClock,
};
use crate::store::{EmergencyReport, IntersectionStore, Merge, SnapshotMerge};

/// Number of unacknowledged writes remembered per intersection.
const ECHO_WINDOW: usize = 16;

/// Retry schedule for shared-store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

/// Everything needed to start a session, resolved from config and flags.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub tick_interval: Duration,
    pub policy: ControlPolicy,
    /// Records used when the backend holds none.
    pub seeds: Vec<Intersection>,
    pub retry: RetryPolicy,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &SignalConfig) -> Self {
        Self {
            tick_interval: config.controller.tick_interval(),
            policy: config.control,
            seeds: config
                .intersections
                .clone()
                .unwrap_or_else(seed_intersections),
            retry: RetryPolicy {
                max_retries: config.sync.max_retries,
                backoff: config.sync.retry_backoff(),
            },
        }
    }
}

/// Result of an operator action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    /// The record after the action.
    pub record: IntersectionRecord,
    /// Whether the record changed.
    pub applied: bool,
}

/// A running controller session.
#[derive(Debug)]
pub struct Controller {
    session_id: Uuid,
    store: Arc<IntersectionStore>,
    backend: Arc<dyn SyncBackend>,
    emitter: Arc<EventEmitter>,
    clock: PhaseClock,
    clock_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    outbox: Outbox,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ticks: Arc<AtomicU64>,
}

impl Controller {
    /// Loads the initial records, starts the background tasks and the
    /// clock.
    ///
    /// When the backend holds no records the session starts from
    /// `settings.seeds` and publishes them to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or subscribed to,
    /// or if a seed record is invalid.
    pub async fn start(
        settings: SessionSettings,
        backend: Arc<dyn SyncBackend>,
        emitter: Arc<EventEmitter>,
        parent: &CancellationToken,
    ) -> Result<Self, SignalError> {
        let session_id = Uuid::new_v4();
        let cancel = parent.child_token();
        let (writes, write_rx) = mpsc::unbounded_channel();
        let echoes = Arc::new(EchoFilter::default());
        let outbox = Outbox {
            writes,
            echoes: Arc::clone(&echoes),
        };

        let remote = backend.load().await?;
        let store = if remote.is_empty() {
            let store = IntersectionStore::with_intersections(settings.policy, settings.seeds)
                .map_err(|(id, source)| ConfigError::InvalidIntersection { id, source })?;
            info!(
                count = store.len(),
                backend = backend.kind().as_str(),
                "backend is empty, publishing seed records"
            );
            for item in store.snapshot() {
                outbox.push(&item);
            }
            store
        } else {
            let store = IntersectionStore::new(settings.policy);
            for (id, e) in store.replace_from_remote(remote) {
                warn!(intersection = %id, error = %e, "skipping invalid record from backend");
            }
            store
        };
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_writer(
            Arc::clone(&backend),
            write_rx,
            settings.retry,
            Arc::clone(&echoes),
            Arc::clone(&emitter),
            cancel.clone(),
        )));

        if let Some(changes) = backend.subscribe(cancel.clone()).await? {
            tasks.push(tokio::spawn(run_subscriber(
                Arc::clone(&store),
                changes,
                outbox.clone(),
                Arc::clone(&emitter),
                cancel.clone(),
            )));
        }

        let clock = PhaseClock::new(settings.tick_interval, &cancel);
        let ticks = Arc::new(AtomicU64::new(0));
        let clock_task = clock.start(tick_handler(
            Arc::clone(&store),
            outbox.clone(),
            Arc::clone(&emitter),
            Arc::clone(&ticks),
        ));

        metrics::set_intersections(store.status_counts());
        emitter.emit(Event::ControllerStarted {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            backend: backend.kind().as_str().to_string(),
            intersections: store.len(),
            tick_interval_ms: u64::try_from(settings.tick_interval.as_millis()).unwrap_or(u64::MAX),
        });
        info!(
            session = %session_id,
            backend = backend.kind().as_str(),
            intersections = store.len(),
            tick_interval = ?settings.tick_interval,
            "controller started"
        );

        Ok(Self {
            session_id,
            store,
            backend,
            emitter,
            clock,
            clock_task: Mutex::new(Some(clock_task)),
            cancel,
            outbox,
            tasks: Mutex::new(tasks),
            ticks,
        })
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<IntersectionStore> {
        &self.store
    }

    /// Ticks processed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Intersection> {
        self.store.snapshot()
    }

    #[must_use]
    pub fn get(&self, id: &IntersectionId) -> Option<IntersectionRecord> {
        self.store.get(id)
    }

    /// Applies a named operator action to one intersection.
    ///
    /// An unrecognised action name is a no-op that returns the record
    /// unchanged with `applied: false`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownIntersection`] if `id` is not known.
    pub fn control(&self, id: &IntersectionId, action: &str) -> Result<ControlOutcome, ControlError> {
        let Some(parsed) = ControlAction::parse(action) else {
            let record = self
                .store
                .get(id)
                .ok_or_else(|| ControlError::UnknownIntersection(id.clone()))?;
            match suggest_action(action) {
                Some(suggestion) => warn!(
                    intersection = %id,
                    action,
                    "unknown control action ignored; did you mean '{suggestion}'?"
                ),
                None => warn!(intersection = %id, action, "unknown control action ignored"),
            }
            self.report_control(id, action, false);
            return Ok(ControlOutcome {
                record,
                applied: false,
            });
        };

        let (record, applied) = self
            .store
            .apply_with(id, parsed, |item| self.outbox.push(item))?;
        if applied {
            metrics::set_intersections(self.store.status_counts());
        }
        info!(
            intersection = %id,
            action = parsed.as_str(),
            applied,
            status = %record.status,
            mode = %record.mode,
            phase = %record.current_phase,
            "control action"
        );
        self.report_control(id, parsed.as_str(), applied);
        Ok(ControlOutcome { record, applied })
    }

    /// Applies an emergency override to every intersection not under
    /// maintenance.
    pub fn emergency(&self, action: EmergencyAction) -> EmergencyReport {
        let report = self
            .store
            .emergency_with(action, |item| self.outbox.push(item));
        metrics::record_emergency(action.as_str());
        metrics::set_intersections(self.store.status_counts());
        self.emitter.emit(Event::EmergencyApplied {
            timestamp: Utc::now(),
            kind: action.as_str().to_string(),
            affected: report.affected.len(),
            skipped: report.skipped.len(),
        });
        report
    }

    /// Stops the clock, closes the subscription, drains pending writes and
    /// waits for every background task.
    ///
    /// The clock task is awaited before the writer is told to stop, so a
    /// tick that was in flight is still written.
    pub async fn shutdown(&self, reason: &str) {
        self.clock.stop();
        let clock_task = self
            .clock_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = clock_task {
            if let Err(e) = task.await {
                warn!(error = %e, "phase clock task ended abnormally");
            }
        }
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "controller task ended abnormally");
            }
        }
        let ticks = self.ticks();
        self.emitter.emit(Event::ControllerStopped {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            ticks,
        });
        info!(
            session = %self.session_id,
            backend = self.backend.kind().as_str(),
            ticks,
            reason,
            "controller stopped"
        );
    }

    fn report_control(&self, id: &IntersectionId, action: &str, applied: bool) {
        metrics::record_control_action(action, applied);
        self.emitter.emit(Event::ControlApplied {
            timestamp: Utc::now(),
            intersection: id.to_string(),
            action: action.to_string(),
            applied,
        });
    }
}

// ============================================================================
// Clock
// ============================================================================

fn tick_handler(
    store: Arc<IntersectionStore>,
    outbox: Outbox,
    emitter: Arc<EventEmitter>,
    ticks: Arc<AtomicU64>,
) -> impl FnMut(u64) + Send + 'static {
    move |tick| {
        let started = Instant::now();
        let report = store.tick_all_with(|item| outbox.push(item));
        metrics::record_tick(started.elapsed());
        ticks.fetch_add(1, Ordering::Relaxed);

        for advance in &report.advances {
            debug!(
                tick,
                intersection = %advance.id,
                from = %advance.from,
                to = %advance.to,
                time_remaining = advance.time_remaining,
                "phase advanced"
            );
            metrics::record_phase_transition(&advance.from, &advance.to);
            emitter.emit(Event::PhaseAdvanced {
                timestamp: Utc::now(),
                intersection: advance.id.to_string(),
                from: advance.from.clone(),
                to: advance.to.clone(),
                time_remaining: advance.time_remaining,
            });
        }

        trace!(tick, updated = report.updated.len(), "tick applied");
    }
}

/// Queue between the store's mutation paths and the writer task.
///
/// Pushed under the store lock, so the writer sees records in the order
/// they were applied.
#[derive(Debug, Clone)]
struct Outbox {
    writes: mpsc::UnboundedSender<Intersection>,
    echoes: Arc<EchoFilter>,
}

impl Outbox {
    fn push(&self, item: &Intersection) {
        self.echoes.record(item);
        if self.writes.send(item.clone()).is_err() {
            debug!(intersection = %item.id, "write queue closed; session is shutting down");
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

async fn run_writer(
    backend: Arc<dyn SyncBackend>,
    mut rx: mpsc::UnboundedReceiver<Intersection>,
    retry: RetryPolicy,
    echoes: Arc<EchoFilter>,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            () = cancel.cancelled() => break,
        };
        write_one(backend.as_ref(), &item, retry, &echoes, &emitter, &cancel).await;
    }

    // Flush what is already queued, one attempt each.
    let mut drained = 0usize;
    let single = RetryPolicy {
        max_retries: 0,
        ..retry
    };
    while let Ok(item) = rx.try_recv() {
        write_one(backend.as_ref(), &item, single, &echoes, &emitter, &cancel).await;
        drained += 1;
    }
    debug!(drained, "sync writer stopped");
}

async fn write_one(
    backend: &dyn SyncBackend,
    item: &Intersection,
    retry: RetryPolicy,
    echoes: &EchoFilter,
    emitter: &EventEmitter,
    cancel: &CancellationToken,
) {
    match write_with_retry(backend, item, retry, cancel).await {
        Ok(outcome) => {
            echoes.mark_synced(&item.id);
            trace!(intersection = %item.id, outcome = outcome.as_str(), "record synced");
            metrics::record_store_write(outcome);
        }
        Err((attempts, e)) => {
            warn!(
                intersection = %item.id,
                attempts,
                error = %e,
                "giving up on store write; local state stays authoritative"
            );
            echoes.mark_unsynced(&item.id);
            metrics::record_store_write(WriteOutcome::Failed);
            emitter.emit(Event::SyncFailed {
                timestamp: Utc::now(),
                intersection: item.id.to_string(),
                attempts,
                error: e.to_string(),
            });
        }
    }
}

/// Writes one record, retrying with exponential backoff.
///
/// Retrying stops early once `cancel` fires.
async fn write_with_retry(
    backend: &dyn SyncBackend,
    item: &Intersection,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<WriteOutcome, (u32, StoreError)> {
    let mut attempt = 0u32;
    loop {
        match backend.write(item).await {
            Ok(()) if attempt == 0 => return Ok(WriteOutcome::Ok),
            Ok(()) => return Ok(WriteOutcome::Retried),
            Err(e) if attempt >= retry.max_retries || cancel.is_cancelled() => {
                return Err((attempt + 1, e));
            }
            Err(e) => {
                let delay = retry.delay(attempt);
                debug!(
                    intersection = %item.id,
                    attempt = attempt + 1,
                    ?delay,
                    error = %e,
                    "store write failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

async fn run_subscriber(
    store: Arc<IntersectionStore>,
    mut changes: mpsc::Receiver<RemoteChange>,
    outbox: Outbox,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            () = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => {
                    debug!("remote change stream closed");
                    break;
                }
            },
        };
        apply_remote(&store, &outbox, &emitter, change);
    }
}

fn apply_remote(
    store: &IntersectionStore,
    outbox: &Outbox,
    emitter: &EventEmitter,
    change: RemoteChange,
) {
    let echoes = outbox.echoes.as_ref();
    let (intersection, kind) = match change {
        RemoteChange::Snapshot(items) => {
            let count = items.len();
            let SnapshotMerge { rejected, kept } = store.merge_snapshot(
                items,
                |id, remote| echoes.holds_local(id, remote),
                |item| outbox.push(item),
            );
            for (id, e) in rejected {
                warn!(intersection = %id, error = %e, "skipping invalid remote record");
            }
            for id in &kept {
                debug!(intersection = %id, "local record has unsynced changes; keeping it over the snapshot");
            }
            debug!(count, kept = kept.len(), "remote snapshot applied");
            (None, "snapshot")
        }
        RemoteChange::Record { id, record } => {
            if echoes.is_echo(&id, &record) {
                trace!(intersection = %id, "ignoring echo of own write");
                return;
            }
            match store.merge_remote(id.clone(), record) {
                Ok(Merge::Unchanged) => return,
                Ok(merge) => {
                    debug!(intersection = %id, ?merge, "remote record applied");
                    (Some(id), "record")
                }
                Err(e) => {
                    warn!(intersection = %id, error = %e, "skipping invalid remote record");
                    return;
                }
            }
        }
        RemoteChange::Field { id, field, value } => {
            match store.merge_remote_field(&id, &field, value) {
                Ok(Merge::Unchanged) => return,
                Ok(_) => {
                    debug!(intersection = %id, field = %field, "remote field applied");
                    (Some(id), "field")
                }
                Err(e) => {
                    warn!(intersection = %id, field = %field, error = %e, "skipping remote field update");
                    return;
                }
            }
        }
        RemoteChange::Removed { id } => {
            debug!(intersection = %id, "remote deletion ignored; records live for the session");
            return;
        }
    };

    metrics::record_remote_update(kind);
    metrics::set_intersections(store.status_counts());
    emitter.emit(Event::RemoteUpdateApplied {
        timestamp: Utc::now(),
        intersection: intersection.map(|id| id.to_string()),
        kind: kind.to_string(),
    });
}

/// Records this session has written but not yet seen echoed back by the
/// shared store, plus intersections whose last write failed.
///
/// A realtime store streams every write back to its writer; applying that
/// echo after a later local tick would rewind the countdown.
#[derive(Debug, Default)]
struct EchoFilter {
    pending: DashMap<IntersectionId, VecDeque<IntersectionRecord>>,
    unsynced: DashSet<IntersectionId>,
}

impl EchoFilter {
    fn record(&self, item: &Intersection) {
        let mut queue = self.pending.entry(item.id.clone()).or_default();
        if queue.len() == ECHO_WINDOW {
            queue.pop_front();
        }
        queue.push_back(item.record.clone());
    }

    /// Returns `true` and forgets everything up to `record` if it is one
    /// of ours.
    fn is_echo(&self, id: &IntersectionId, record: &IntersectionRecord) -> bool {
        let Some(mut queue) = self.pending.get_mut(id) else {
            return false;
        };
        match queue.iter().position(|r| r == record) {
            Some(pos) => {
                queue.drain(..=pos);
                true
            }
            None => false,
        }
    }

    /// Whether the local copy of `id` must win over `remote` from a
    /// collection snapshot.
    ///
    /// True while writes for `id` are unacknowledged or the last one
    /// failed. A snapshot copy matching one of our writes counts as its
    /// echo.
    fn holds_local(&self, id: &IntersectionId, remote: &IntersectionRecord) -> bool {
        self.is_echo(id, remote);
        let pending = self.pending.get(id).is_some_and(|queue| !queue.is_empty());
        pending || self.unsynced.contains(id)
    }

    fn mark_synced(&self, id: &IntersectionId) {
        self.unsynced.remove(id);
    }

    fn mark_unsynced(&self, id: &IntersectionId) {
        self.unsynced.insert(id.clone());
    }
}
