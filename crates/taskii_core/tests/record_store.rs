use std::thread;
use std::time::Duration;
use taskii_core::{
    ChangeKind, ChangeOrigin, RecordStore, StoreConfig, StoreError, SyncConfig, SyncEngine,
};
use uuid::Uuid;

#[test]
fn create_then_read_returns_same_timestamp() {
    let store = RecordStore::open_in_memory().unwrap();

    for timestamp in [0_i64, 1, 1_700_000_000_000, i64::MAX] {
        let created = store.create(timestamp).unwrap();
        let loaded = store.read(created.id).unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.timestamp, timestamp);
    }
}

#[test]
fn create_rejects_negative_timestamp() {
    let store = RecordStore::open_in_memory().unwrap();

    let err = store.create(-5).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn missing_ids_are_not_found() {
    let store = RecordStore::open_in_memory().unwrap();
    let missing = Uuid::new_v4();

    assert!(store.read(missing).unwrap().is_none());
    assert!(matches!(
        store.update(missing, 10).unwrap_err(),
        StoreError::NotFound(id) if id == missing
    ));
    assert!(matches!(
        store.delete(missing).unwrap_err(),
        StoreError::NotFound(id) if id == missing
    ));
}

#[test]
fn delete_tombstones_record_and_hides_it() {
    let store = RecordStore::open_in_memory().unwrap();
    let record = store.create(100).unwrap();

    store.delete(record.id).unwrap();

    assert!(store.read(record.id).unwrap().is_none());
    assert!(store.list().unwrap().is_empty());
    let tombstone = store.read_including_deleted(record.id).unwrap().unwrap();
    assert!(tombstone.is_deleted);
    assert_eq!(tombstone.record.timestamp, 100);

    assert!(matches!(
        store.delete(record.id).unwrap_err(),
        StoreError::NotFound(_)
    ));
    assert!(matches!(
        store.update(record.id, 200).unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[test]
fn final_state_matches_last_applied_operation() {
    let store = RecordStore::open_in_memory().unwrap();

    let record = store.create(1).unwrap();
    store.update(record.id, 2).unwrap();
    store.update(record.id, 3).unwrap();
    assert_eq!(store.read(record.id).unwrap().unwrap().timestamp, 3);

    store.update(record.id, 1).unwrap();
    assert_eq!(store.read(record.id).unwrap().unwrap().timestamp, 1);

    store.delete(record.id).unwrap();
    assert!(store.read(record.id).unwrap().is_none());
}

#[test]
fn list_orders_by_timestamp_then_id() {
    let store = RecordStore::open_in_memory().unwrap();
    let late = store.create(300).unwrap();
    let early = store.create(100).unwrap();
    let tie_a = store.create(200).unwrap();
    let tie_b = store.create(200).unwrap();

    let listed = store.list().unwrap();
    let (first_tie, second_tie) = if tie_a.id.to_string() < tie_b.id.to_string() {
        (tie_a, tie_b)
    } else {
        (tie_b, tie_a)
    };
    assert_eq!(listed, vec![early, first_tie, second_tie, late]);
}

#[test]
fn local_writes_are_queued_in_same_transaction() {
    let store = RecordStore::open_in_memory().unwrap();
    let sync = SyncEngine::new(store.clone(), SyncConfig::default());

    let record = store.create(10).unwrap();
    let pending = sync.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].mutation.record_id, record.id);

    assert!(store.update(Uuid::new_v4(), 5).is_err());
    assert_eq!(sync.pending().unwrap().len(), 1);
}

#[test]
fn sync_disabled_store_queues_nothing() {
    let config = StoreConfig {
        sync_enabled: false,
        ..StoreConfig::in_memory()
    };
    let store = RecordStore::open(&config).unwrap();
    let sync = SyncEngine::new(store.clone(), SyncConfig::default());

    store.create(10).unwrap();
    assert!(sync.pending().unwrap().is_empty());
}

#[test]
fn subscription_delivers_ordered_changes_and_restarts() {
    let store = RecordStore::open_in_memory().unwrap();
    let mut subscription = store.subscribe(None).unwrap();

    let record = store.create(1).unwrap();
    store.update(record.id, 2).unwrap();
    store.delete(record.id).unwrap();

    let events = subscription.poll().unwrap();
    let kinds: Vec<ChangeKind> = events.iter().map(|event| event.kind).collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
    );
    assert!(events.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    assert!(events.iter().all(|event| event.origin == ChangeOrigin::Local));
    assert!(subscription.poll().unwrap().is_empty());

    let resume_from = events[0].seq;
    let mut restarted = store.subscribe(Some(resume_from)).unwrap();
    let replayed = restarted.poll().unwrap();
    assert_eq!(replayed, events[1..].to_vec());
    assert_eq!(restarted.last_seq(), subscription.last_seq());
}

#[test]
fn subscription_from_now_skips_history() {
    let store = RecordStore::open_in_memory().unwrap();
    store.create(1).unwrap();

    let mut subscription = store.subscribe(None).unwrap();
    assert!(subscription.poll().unwrap().is_empty());

    let mut full = store.subscribe(Some(0)).unwrap();
    assert_eq!(full.poll().unwrap().len(), 1);
}

#[test]
fn subscription_wait_wakes_on_commit_from_other_thread() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(&StoreConfig::file(dir.path().join("feed.db"))).unwrap();
    let mut subscription = store.subscribe(None).unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            store.create(42).unwrap()
        })
    };

    let events = subscription.wait(Duration::from_secs(5)).unwrap();
    let created = writer.join().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].record_id, created.id);
    assert_eq!(events[0].timestamp, 42);

    assert!(subscription
        .wait(Duration::from_millis(20))
        .unwrap()
        .is_empty());
}

#[test]
fn concurrent_writers_on_distinct_ids_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(&StoreConfig::file(dir.path().join("concurrent.db"))).unwrap();
    let records: Vec<_> = (0..8).map(|i| store.create(i).unwrap()).collect();

    let handles: Vec<_> = records
        .iter()
        .map(|record| {
            let store = store.clone();
            let id = record.id;
            thread::spawn(move || {
                for step in 0..10 {
                    store.update(id, 1_000 + step).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for record in records {
        assert_eq!(store.read(record.id).unwrap().unwrap().timestamp, 1_009);
    }
}

#[test]
fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.db");

    let created = {
        let store = RecordStore::open(&StoreConfig::file(&path)).unwrap();
        store.create(77).unwrap()
    };

    let reopened = RecordStore::open(&StoreConfig::file(&path)).unwrap();
    assert_eq!(reopened.read(created.id).unwrap(), Some(created));
}

#[test]
fn compacted_journal_resumes_old_cursors_at_oldest_retained_entry() {
    let store = RecordStore::open_in_memory().unwrap();
    let record = store.create(1).unwrap();
    store.update(record.id, 2).unwrap();
    store.update(record.id, 3).unwrap();

    assert_eq!(store.compact_changes(3).unwrap(), 2);
    assert_eq!(store.compact_changes(3).unwrap(), 0);

    let mut stale = store.subscribe(Some(0)).unwrap();
    let events = stale.poll().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 3);
    assert_eq!(events[0].timestamp, 3);

    store.update(record.id, 4).unwrap();
    let next = stale.poll().unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].seq, 4);
}

#[test]
fn reopen_trims_journal_to_configured_retention() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retention.db");

    {
        let store = RecordStore::open(&StoreConfig::file(&path)).unwrap();
        for timestamp in 0..5 {
            store.create(timestamp).unwrap();
        }
    }

    let config = StoreConfig {
        change_log_retention: Some(2),
        ..StoreConfig::file(&path)
    };
    let reopened = RecordStore::open(&config).unwrap();
    let retained = reopened.subscribe(Some(0)).unwrap().poll().unwrap();
    let seqs: Vec<i64> = retained.iter().map(|event| event.seq).collect();
    assert_eq!(seqs, vec![4, 5]);
    assert_eq!(reopened.count().unwrap(), 5);
}
