//! SQLite-backed record store.

use crate::config::{StoreConfig, StoreLocation};
use crate::model::change::{ChangeKind, ChangeOrigin};
use crate::model::record::{Record, RecordId};
use crate::repo::change_log::{append_change, delete_changes_before, latest_seq};
use crate::repo::record_repo::{RecordRepository, SqliteRecordRepository, StoredRecord};
use crate::store::feed::{ChangeNotifier, Subscription};
use crate::store::locks::RowLocks;
use crate::store::pool::{ConnectionPool, PooledConnection};
use crate::store::{StoreError, StoreResult};
use crate::sync::outbox;
use crate::sync::types::{MergeOutcome, Mutation, MutationOp, RemoteChange, RemoteOp};
use log::{debug, info};
use rusqlite::{Connection, TransactionBehavior};
use std::sync::Arc;
use std::time::Instant;

struct StoreInner {
    pool: ConnectionPool,
    locks: RowLocks,
    notifier: ChangeNotifier,
    sync_enabled: bool,
}

/// Cloneable handle to the local store. Clones share one pool.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

impl RecordStore {
    /// Opens (creating when needed) the store described by `config`.
    ///
    /// # Errors
    /// - `StoreError::Db` with `DbError::Corrupt`/`UnsupportedSchemaVersion`
    ///   when persisted state cannot be trusted.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let pool = ConnectionPool::open(config.location.clone())?;
        info!(
            "event=store_open module=store status=ok mode={} sync_enabled={}",
            location_label(pool.location()),
            config.sync_enabled
        );
        let store = Self {
            inner: Arc::new(StoreInner {
                pool,
                locks: RowLocks::new(),
                notifier: ChangeNotifier::default(),
                sync_enabled: config.sync_enabled,
            }),
        };
        if let Some(keep) = config.change_log_retention {
            store.retain_latest_changes(keep)?;
        }
        Ok(store)
    }

    /// Opens a private in-memory store with sync queueing enabled.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Creates a record with a fresh id.
    pub fn create(&self, timestamp: i64) -> StoreResult<Record> {
        let record = Record::new(timestamp)?;
        self.write(record.id, "create", |conn| {
            SqliteRecordRepository::new(conn).insert_record(&record)?;
            append_change(conn, record.id, ChangeKind::Insert, timestamp, ChangeOrigin::Local)?;
            self.enqueue_local(conn, record.id, MutationOp::Create, timestamp)?;
            Ok(record)
        })
    }

    /// Reads one live record. Tombstoned or unknown ids yield `None`.
    pub fn read(&self, id: RecordId) -> StoreResult<Option<Record>> {
        let conn = self.connection()?;
        let stored = SqliteRecordRepository::new(&conn).get_record(id, false)?;
        Ok(stored.map(|stored| stored.record))
    }

    /// Reads one record including tombstones.
    pub fn read_including_deleted(&self, id: RecordId) -> StoreResult<Option<StoredRecord>> {
        let conn = self.connection()?;
        SqliteRecordRepository::new(&conn).get_record(id, true)
    }

    /// Replaces the timestamp of a live record.
    pub fn update(&self, id: RecordId, timestamp: i64) -> StoreResult<Record> {
        let record = Record::with_id(id, timestamp)?;
        self.write(id, "update", |conn| {
            SqliteRecordRepository::new(conn).update_timestamp(id, timestamp)?;
            append_change(conn, id, ChangeKind::Update, timestamp, ChangeOrigin::Local)?;
            self.enqueue_local(conn, id, MutationOp::Update, timestamp)?;
            Ok(record)
        })
    }

    /// Tombstones a live record.
    pub fn delete(&self, id: RecordId) -> StoreResult<()> {
        self.write(id, "delete", |conn| {
            let removed = SqliteRecordRepository::new(conn).mark_deleted(id)?;
            append_change(conn, id, ChangeKind::Delete, removed.timestamp, ChangeOrigin::Local)?;
            self.enqueue_local(conn, id, MutationOp::Delete, removed.timestamp)?;
            Ok(())
        })
    }

    /// Lists live records ordered by `timestamp`, then `id`.
    pub fn list(&self) -> StoreResult<Vec<Record>> {
        let conn = self.connection()?;
        SqliteRecordRepository::new(&conn).list_records()
    }

    /// Number of live records.
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.connection()?;
        SqliteRecordRepository::new(&conn).count_records()
    }

    /// Subscribes to committed changes.
    ///
    /// `from_seq = None` starts at the current head; `Some(seq)` replays every
    /// change after `seq` first (`Some(0)` replays the whole journal).
    pub fn subscribe(&self, from_seq: Option<i64>) -> StoreResult<Subscription> {
        let start = match from_seq {
            Some(seq) => seq.max(0),
            None => {
                let conn = self.connection()?;
                latest_seq(&conn)?
            }
        };
        Ok(Subscription::new(self.clone(), start))
    }

    /// Drops journal entries with `seq < before_seq`. Returns how many went.
    ///
    /// Subscribers restarting from an older cursor resume at the oldest
    /// retained entry; sequence numbers are never reused.
    pub fn compact_changes(&self, before_seq: i64) -> StoreResult<usize> {
        let removed = self.transact(|conn| delete_changes_before(conn, before_seq))?;
        if removed > 0 {
            info!(
                "event=change_log_compact module=store status=ok before_seq={} removed={}",
                before_seq, removed
            );
        }
        Ok(removed)
    }

    /// Keeps only the newest `keep` journal entries.
    pub fn retain_latest_changes(&self, keep: u64) -> StoreResult<usize> {
        let head = {
            let conn = self.connection()?;
            latest_seq(&conn)?
        };
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.compact_changes(head.saturating_sub(keep).saturating_add(1))
    }

    /// Merges one remote change using last-writer-wins on `timestamp`.
    ///
    /// Equal timestamps resolve in favour of the remote, except that a remote
    /// upsert never undoes a pending local delete of the same version. A
    /// winning remote change drops any pending outbound mutation for the id.
    pub fn merge_remote(&self, change: &RemoteChange) -> StoreResult<MergeOutcome> {
        let remote = Record::with_id(change.record_id, change.timestamp)?;
        self.write(change.record_id, "merge_remote", |conn| {
            let repo = SqliteRecordRepository::new(conn);
            let local = repo.get_record(remote.id, true)?;

            if let Some(local) = local {
                if change.timestamp < local.record.timestamp {
                    return Ok(MergeOutcome::KeptLocal);
                }
                // An undelivered local delete keeps the last live timestamp, so
                // an echo of that state must not resurrect the record.
                if change.timestamp == local.record.timestamp
                    && local.is_deleted
                    && change.op == RemoteOp::Upsert
                    && outbox::pending_op(conn, remote.id)? == Some(MutationOp::Delete)
                {
                    return Ok(MergeOutcome::KeptLocal);
                }
            }

            let remote_deleted = change.op == RemoteOp::Delete;
            repo.upsert_record(&remote, remote_deleted)?;
            outbox::supersede(conn, remote.id)?;

            let visible_change = match (local, change.op) {
                (None, RemoteOp::Delete) => return Ok(MergeOutcome::Ignored),
                (None, RemoteOp::Upsert) => Some(ChangeKind::Insert),
                (Some(local), RemoteOp::Upsert) if local.is_deleted => Some(ChangeKind::Insert),
                (Some(local), RemoteOp::Upsert) => {
                    (local.record.timestamp != remote.timestamp).then_some(ChangeKind::Update)
                }
                (Some(local), RemoteOp::Delete) => {
                    (!local.is_deleted).then_some(ChangeKind::Delete)
                }
            };
            if let Some(kind) = visible_change {
                append_change(conn, remote.id, kind, remote.timestamp, ChangeOrigin::Remote)?;
            }
            Ok(MergeOutcome::Applied)
        })
    }

    /// Checks out a pooled connection for crate-internal reads.
    pub(crate) fn connection(&self) -> StoreResult<PooledConnection<'_>> {
        Ok(self.inner.pool.get()?)
    }

    /// Runs `f` inside one immediate transaction without taking a row lock.
    ///
    /// Used for queue bookkeeping that never touches `records`.
    pub(crate) fn transact<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.inner.notifier
    }

    #[cfg(test)]
    pub(crate) fn row_locks(&self) -> &RowLocks {
        &self.inner.locks
    }

    fn write<T>(
        &self,
        id: RecordId,
        op: &'static str,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let started_at = Instant::now();
        let _row = self.inner.locks.lock(id);

        let result = self.transact(f);
        match &result {
            Ok(_) => {
                self.inner.notifier.notify();
                debug!(
                    "event=record_write module=store status=ok op={} record_id={} duration_ms={}",
                    op,
                    id,
                    started_at.elapsed().as_millis()
                );
            }
            Err(StoreError::NotFound(_)) => {
                debug!(
                    "event=record_write module=store status=not_found op={} record_id={}",
                    op, id
                );
            }
            Err(err) => {
                log::error!(
                    "event=record_write module=store status=error op={} record_id={} duration_ms={} error={}",
                    op,
                    id,
                    started_at.elapsed().as_millis(),
                    err
                );
            }
        }
        result
    }

    fn enqueue_local(
        &self,
        conn: &Connection,
        record_id: RecordId,
        op: MutationOp,
        timestamp: i64,
    ) -> StoreResult<()> {
        if self.inner.sync_enabled {
            outbox::enqueue(
                conn,
                &Mutation {
                    record_id,
                    op,
                    timestamp,
                },
            )?;
        }
        Ok(())
    }
}

fn location_label(location: &StoreLocation) -> &'static str {
    match location {
        StoreLocation::File(_) => "file",
        StoreLocation::InMemory => "memory",
    }
}

#[cfg(test)]
mod tests {
    use super::RecordStore;
    use crate::config::StoreConfig;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn update_of_other_id_is_not_blocked_by_held_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&StoreConfig::file(dir.path().join("rows.db"))).unwrap();
        let blocked = store.create(1).unwrap();
        let free = store.create(2).unwrap();

        let held = store.row_locks().lock(blocked.id);

        let (tx, rx) = mpsc::channel();
        let worker = {
            let store = store.clone();
            thread::spawn(move || {
                let updated = store.update(free.id, 20).unwrap();
                tx.send(updated.timestamp).unwrap();
            })
        };
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 20);
        worker.join().unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let store = store.clone();
            thread::spawn(move || {
                store.update(blocked.id, 10).unwrap();
                tx.send(()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();

        assert_eq!(store.read(blocked.id).unwrap().unwrap().timestamp, 10);
    }

    #[test]
    fn readers_are_not_blocked_by_held_row() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(5).unwrap();
        let _held = store.row_locks().lock(record.id);

        assert_eq!(store.read(record.id).unwrap(), Some(record));
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
