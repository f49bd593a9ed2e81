//! Sync engine: outbound drain, inbound pull, and remote merge.
//!
//! # Responsibility
//! - Deliver queued mutations in queue order with exponential backoff.
//! - Park mutations that exhaust retries and notify failure listeners.
//! - Pull remote pages from the persisted cursor and merge them locally.
//!
//! # Invariants
//! - Only one drain runs at a time; concurrent callers are skipped.
//! - Backend calls never run while a store connection or row lock is held.
//! - Remote unavailability never surfaces as a local read/write failure.

use crate::config::SyncConfig;
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::sync::backend::{CancelToken, RemoteBackend};
use crate::sync::clock::{Clock, SystemClock};
use crate::sync::outbox::{self, LAST_ERROR_KEY, REMOTE_CURSOR_KEY};
use crate::sync::registry::{BackendRegistry, BackendRegistryError};
use crate::sync::types::{
    DrainReport, MergeOutcome, Mutation, OutboxEntry, PermanentFailure, PullReport, RemoteChange,
    RemoteError, SyncStage, SyncStatus,
};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug)]
pub enum SyncError {
    Store(StoreError),
    /// Remote service unreachable or no backend selected; retry later.
    Unavailable(RemoteError),
    FailureNotFound(i64),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Unavailable(err) => write!(f, "sync unavailable: {err}"),
            Self::FailureNotFound(seq) => write!(f, "sync failure not found: {seq}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Unavailable(err) => Some(err),
            Self::FailureNotFound(_) => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// What a failed push did to its queue entry.
enum FailedAttempt {
    Parked,
    Retrying,
    /// A local write replaced the entry during the push; nothing was parked.
    Coalesced,
}

/// Combined result of one background cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub drain: DrainReport,
    pub pull: Option<PullReport>,
}

pub struct SyncEngine {
    store: RecordStore,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    registry: RwLock<BackendRegistry>,
    drain_gate: Mutex<()>,
    failure_listeners: Mutex<Vec<Sender<PermanentFailure>>>,
}

impl SyncEngine {
    pub fn new(store: RecordStore, config: SyncConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: RecordStore, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            registry: RwLock::new(BackendRegistry::new()),
            drain_gate: Mutex::new(()),
            failure_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Registers a backend and makes it active.
    pub fn register_backend(&self, backend: Arc<dyn RemoteBackend>) -> Result<(), BackendRegistryError> {
        let backend_id = backend.backend_id().trim().to_string();
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.register(backend)?;
        registry.select_active(&backend_id)
    }

    /// Runs `f` with mutable access to the backend registry.
    pub fn with_registry<T>(&self, f: impl FnOnce(&mut BackendRegistry) -> T) -> T {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut registry)
    }

    /// Appends a mutation to the outbound queue, coalescing per record id.
    pub fn enqueue(&self, mutation: &Mutation) -> StoreResult<i64> {
        self.store.transact(|conn| outbox::enqueue(conn, mutation))
    }

    /// Merges one incoming remote change into the local store.
    pub fn apply_remote(&self, change: &RemoteChange) -> StoreResult<MergeOutcome> {
        let outcome = self.store.merge_remote(change)?;
        debug!(
            "event=sync_apply_remote module=sync status=ok record_id={} outcome={:?}",
            change.record_id, outcome
        );
        Ok(outcome)
    }

    /// Attempts delivery of queued mutations in queue order.
    ///
    /// Stops at the first retryable failure so later entries never overtake
    /// earlier ones; the next drain resumes from that entry.
    pub fn drain(&self, cancel: &CancelToken) -> SyncResult<DrainReport> {
        let _gate = match self.drain_gate.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Ok(DrainReport {
                    skipped: true,
                    ..DrainReport::default()
                });
            }
        };

        let backend = self.active_backend(SyncStage::Push)?;
        let mut report = DrainReport::default();

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let entry = {
                let conn = self.store.connection()?;
                outbox::next_pending(&conn)?
            };
            let Some(entry) = entry else {
                break;
            };

            let now = self.clock.now_ms();
            if entry.next_attempt_at_ms > now {
                report.deferred_until_ms = Some(entry.next_attempt_at_ms);
                break;
            }

            match backend.push(&entry.mutation, cancel) {
                Ok(_) => {
                    let acknowledged = self.store.transact(|conn| {
                        let acknowledged = outbox::acknowledge(conn, &entry)?;
                        outbox::set_state(conn, LAST_ERROR_KEY, None)?;
                        Ok(acknowledged)
                    })?;
                    if !acknowledged {
                        debug!(
                            "event=sync_push module=sync status=coalesced seq={} record_id={}",
                            entry.seq, entry.mutation.record_id
                        );
                    }
                    report.delivered += 1;
                }
                Err(err) if err.cancelled || cancel.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    let outcome = self.record_failed_attempt(&entry, &err, now)?;
                    report.last_error = Some(err);
                    match outcome {
                        FailedAttempt::Parked => {
                            report.parked += 1;
                            continue;
                        }
                        FailedAttempt::Coalesced => continue,
                        FailedAttempt::Retrying => break,
                    }
                }
            }
        }

        info!(
            "event=sync_drain module=sync status={} delivered={} parked={} cancelled={}",
            if report.last_error.is_some() { "retry" } else { "ok" },
            report.delivered,
            report.parked,
            report.cancelled
        );
        Ok(report)
    }

    /// Pulls remote pages from the persisted cursor and merges them.
    pub fn pull(&self, cancel: &CancelToken) -> SyncResult<PullReport> {
        let backend = self.active_backend(SyncStage::Pull)?;
        let mut report = PullReport {
            cursor: self.remote_cursor()?,
            ..PullReport::default()
        };

        while !cancel.is_cancelled() {
            let page = backend
                .pull(report.cursor.as_deref(), self.config.pull_batch_size, cancel)
                .map_err(|err| {
                    warn!(
                        "event=sync_pull module=sync status=error code={} retryable={}",
                        err.code, err.retryable
                    );
                    SyncError::Unavailable(err)
                })?;

            for change in &page.changes {
                report.received += 1;
                match self.apply_remote(change) {
                    Ok(MergeOutcome::Applied) => report.applied += 1,
                    Ok(MergeOutcome::KeptLocal | MergeOutcome::Ignored) => {}
                    Err(StoreError::Validation(err)) => {
                        report.rejected += 1;
                        warn!(
                            "event=sync_pull module=sync status=rejected record_id={} error={}",
                            change.record_id, err
                        );
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let advanced = match page.next_cursor {
                Some(next_cursor) if report.cursor.as_deref() != Some(next_cursor.as_str()) => {
                    self.store.transact(|conn| {
                        outbox::set_state(conn, REMOTE_CURSOR_KEY, Some(next_cursor.as_str()))
                    })?;
                    report.cursor = Some(next_cursor);
                    true
                }
                _ => false,
            };

            if !page.has_more {
                break;
            }
            if !advanced {
                warn!("event=sync_pull module=sync status=error code=cursor_not_advanced");
                break;
            }
        }

        info!(
            "event=sync_pull module=sync status=ok received={} applied={} rejected={}",
            report.received, report.applied, report.rejected
        );
        Ok(report)
    }

    /// One background cycle: drain, then pull unless cancelled.
    pub fn run_cycle(&self, cancel: &CancelToken) -> SyncResult<CycleReport> {
        let drain = self.drain(cancel)?;
        let pull = if drain.cancelled || cancel.is_cancelled() {
            None
        } else {
            Some(self.pull(cancel)?)
        };
        Ok(CycleReport { drain, pull })
    }

    /// Snapshot for the "pending changes" indicator.
    pub fn status(&self) -> StoreResult<SyncStatus> {
        let conn = self.store.connection()?;
        let (pending, failed) = outbox::counts(&conn)?;
        Ok(SyncStatus {
            backend_id: self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .active_backend_id()
                .map(str::to_string),
            pending,
            failed,
            next_retry_at_ms: outbox::next_retry_at(&conn)?,
            last_error: outbox::get_state(&conn, LAST_ERROR_KEY)?,
            remote_cursor: outbox::get_state(&conn, REMOTE_CURSOR_KEY)?,
        })
    }

    /// Pending entries in delivery order.
    pub fn pending(&self) -> StoreResult<Vec<OutboxEntry>> {
        let conn = self.store.connection()?;
        outbox::list_pending(&conn)
    }

    /// Parked permanent failures awaiting acknowledgement.
    pub fn failures(&self) -> StoreResult<Vec<PermanentFailure>> {
        let conn = self.store.connection()?;
        outbox::list_failures(&conn)
    }

    /// Removes a parked failure once the presentation layer acknowledged it.
    pub fn acknowledge_failure(&self, seq: i64) -> SyncResult<()> {
        if self.store.transact(|conn| outbox::acknowledge_failure(conn, seq))? {
            Ok(())
        } else {
            Err(SyncError::FailureNotFound(seq))
        }
    }

    /// Registers a listener for newly parked failures.
    pub fn subscribe_failures(&self) -> Receiver<PermanentFailure> {
        let (tx, rx) = mpsc::channel();
        self.lock_listeners().push(tx);
        rx
    }

    fn remote_cursor(&self) -> StoreResult<Option<String>> {
        let conn = self.store.connection()?;
        outbox::get_state(&conn, REMOTE_CURSOR_KEY)
    }

    fn active_backend(&self, stage: SyncStage) -> SyncResult<Arc<dyn RemoteBackend>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .require_active(stage)
            .map_err(SyncError::Unavailable)
    }

    fn record_failed_attempt(
        &self,
        entry: &OutboxEntry,
        err: &RemoteError,
        now_ms: i64,
    ) -> StoreResult<FailedAttempt> {
        let attempts = entry.attempts.saturating_add(1);
        let message = err.to_string();

        if !err.retryable || attempts >= self.config.max_attempts.max(1) {
            let parked = self.store.transact(|conn| {
                let parked = outbox::mark_failed(conn, entry.seq, attempts, &message)?;
                outbox::set_state(conn, LAST_ERROR_KEY, Some(message.as_str()))?;
                Ok(parked)
            })?;
            if !parked {
                debug!(
                    "event=sync_push module=sync status=coalesced seq={} record_id={}",
                    entry.seq, entry.mutation.record_id
                );
                return Ok(FailedAttempt::Coalesced);
            }
            error!(
                "event=sync_push module=sync status=failed seq={} record_id={} attempts={} code={}",
                entry.seq, entry.mutation.record_id, attempts, err.code
            );
            self.notify_failure(PermanentFailure {
                seq: entry.seq,
                mutation: entry.mutation,
                attempts,
                error: message,
            });
            return Ok(FailedAttempt::Parked);
        }

        let delay_ms = i64::try_from(self.config.backoff_ms(attempts)).unwrap_or(i64::MAX);
        let next_attempt_at_ms = now_ms.saturating_add(delay_ms);
        self.store.transact(|conn| {
            outbox::schedule_retry(conn, entry.seq, attempts, next_attempt_at_ms, &message)?;
            outbox::set_state(conn, LAST_ERROR_KEY, Some(message.as_str()))
        })?;
        warn!(
            "event=sync_push module=sync status=retry seq={} attempts={} delay_ms={} code={}",
            entry.seq, attempts, delay_ms, err.code
        );
        Ok(FailedAttempt::Retrying)
    }

    fn notify_failure(&self, failure: PermanentFailure) {
        self.lock_listeners()
            .retain(|listener| listener.send(failure.clone()).is_ok());
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Sender<PermanentFailure>>> {
        self.failure_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
