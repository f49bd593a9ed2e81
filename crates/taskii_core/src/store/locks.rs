//! Per-record write serialization.
//!
//! Writers to the same record id queue behind each other; writers to
//! different ids never wait on one another. The inner mutex only guards the
//! set of held ids and is released before any SQL runs.

use crate::model::record::RecordId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub(crate) struct RowLocks {
    held: Mutex<HashSet<RecordId>>,
    released: Condvar,
}

impl RowLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks until `id` is free, then holds it until the guard drops.
    pub(crate) fn lock(&self, id: RecordId) -> RowGuard<'_> {
        let mut held = self.lock_held();
        while held.contains(&id) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(id);
        RowGuard { locks: self, id }
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self, id: RecordId) -> bool {
        self.lock_held().contains(&id)
    }

    fn lock_held(&self) -> MutexGuard<'_, HashSet<RecordId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct RowGuard<'a> {
    locks: &'a RowLocks,
    id: RecordId,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.locks.lock_held().remove(&self.id);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::RowLocks;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn same_id_waits_for_release() {
        let locks = Arc::new(RowLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.lock(id);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.lock(id);
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert!(!locks.is_locked(id));
    }

    #[test]
    fn different_ids_do_not_wait() {
        let locks = Arc::new(RowLocks::new());
        let _held = locks.lock(Uuid::new_v4());

        let (tx, rx) = mpsc::channel();
        let other = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.lock(Uuid::new_v4());
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        other.join().unwrap();
    }
}
