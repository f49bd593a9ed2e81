//! Restartable change observation.
//!
//! # Responsibility
//! - Wake subscribers after each committed write.
//! - Deliver journal entries strictly in `seq` order.
//!
//! # Invariants
//! - Events are read from `change_log`, never from in-memory buffers, so a
//!   subscriber restarted with its last `seq` misses nothing.

use crate::model::change::ChangeEvent;
use crate::repo::change_log::changes_after;
use crate::store::record_store::RecordStore;
use crate::store::StoreResult;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const FEED_BATCH_LIMIT: u32 = 256;

/// Commit counter that subscribers block on.
#[derive(Default)]
pub(crate) struct ChangeNotifier {
    generation: Mutex<u64>,
    bumped: Condvar,
}

impl ChangeNotifier {
    pub(crate) fn notify(&self) {
        let mut generation = self.lock_generation();
        *generation = generation.wrapping_add(1);
        self.bumped.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.lock_generation()
    }

    fn wait_past(&self, seen: u64, timeout: Duration) {
        let generation = self.lock_generation();
        let _ = self
            .bumped
            .wait_timeout_while(generation, timeout, |current| *current == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ordered stream of committed changes for the whole record collection.
///
/// Persist `last_seq()` and pass it to `RecordStore::subscribe` to resume.
/// A cursor older than the compacted journal resumes at the oldest retained
/// entry.
pub struct Subscription {
    store: RecordStore,
    last_seq: i64,
}

impl Subscription {
    pub(crate) fn new(store: RecordStore, last_seq: i64) -> Self {
        Self { store, last_seq }
    }

    /// Sequence of the last delivered event (restart cursor).
    pub fn last_seq(&self) -> i64 {
        self.last_seq
    }

    /// Returns all changes committed since the last call, without blocking.
    pub fn poll(&mut self) -> StoreResult<Vec<ChangeEvent>> {
        let mut events = Vec::new();
        loop {
            let batch = {
                let conn = self.store.connection()?;
                changes_after(&conn, self.last_seq, FEED_BATCH_LIMIT)?
            };
            let exhausted = batch.len() < FEED_BATCH_LIMIT as usize;
            if let Some(last) = batch.last() {
                self.last_seq = last.seq;
            }
            events.extend(batch);
            if exhausted {
                return Ok(events);
            }
        }
    }

    /// Blocks until at least one change is available or `timeout` elapses.
    ///
    /// Returns an empty vector on timeout.
    pub fn wait(&mut self, timeout: Duration) -> StoreResult<Vec<ChangeEvent>> {
        let deadline = Instant::now() + timeout;
        let store = self.store.clone();
        let notifier = store.notifier();
        loop {
            let seen = notifier.generation();
            let events = self.poll()?;
            if !events.is_empty() {
                return Ok(events);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(events);
            }
            notifier.wait_past(seen, deadline - now);
        }
    }
}
