//! Record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD primitives over canonical `records` storage.
//! - Keep tombstone semantics inside the persistence boundary.
//!
//! # Invariants
//! - Tombstoned rows are invisible unless `include_deleted` is requested.
//! - `update_timestamp` and `mark_deleted` never touch tombstoned rows.

use crate::model::record::{Record, RecordId};
use crate::store::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const RECORD_SELECT_SQL: &str = "SELECT id, timestamp, is_deleted FROM records";

/// Stored row including tombstone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: Record,
    pub is_deleted: bool,
}

/// Repository interface for record persistence.
pub trait RecordRepository {
    fn insert_record(&self, record: &Record) -> StoreResult<()>;
    fn update_timestamp(&self, id: RecordId, timestamp: i64) -> StoreResult<()>;
    fn mark_deleted(&self, id: RecordId) -> StoreResult<Record>;
    fn get_record(&self, id: RecordId, include_deleted: bool) -> StoreResult<Option<StoredRecord>>;
    fn list_records(&self) -> StoreResult<Vec<Record>>;
    fn upsert_record(&self, record: &Record, is_deleted: bool) -> StoreResult<()>;
    fn count_records(&self) -> StoreResult<u64>;
}

/// SQLite-backed record repository.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn insert_record(&self, record: &Record) -> StoreResult<()> {
        record.validate()?;

        self.conn.execute(
            "INSERT INTO records (id, timestamp, is_deleted) VALUES (?1, ?2, 0);",
            params![record.id.to_string(), record.timestamp],
        )?;
        Ok(())
    }

    fn update_timestamp(&self, id: RecordId, timestamp: i64) -> StoreResult<()> {
        Record::with_id(id, timestamp)?;

        let changed = self.conn.execute(
            "UPDATE records
             SET
                timestamp = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2 AND is_deleted = 0;",
            params![timestamp, id.to_string()],
        )?;

        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn mark_deleted(&self, id: RecordId) -> StoreResult<Record> {
        let existing = self
            .get_record(id, false)?
            .ok_or(StoreError::NotFound(id))?;

        self.conn.execute(
            "UPDATE records
             SET
                is_deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id.to_string()],
        )?;
        Ok(existing.record)
    }

    fn get_record(&self, id: RecordId, include_deleted: bool) -> StoreResult<Option<StoredRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{RECORD_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;

        let row = stmt
            .query_row(params![id.to_string(), bool_to_int(include_deleted)], |row| {
                Ok(parse_record_row(row))
            })
            .optional()?;

        row.transpose()
    }

    fn list_records(&self) -> StoreResult<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{RECORD_SELECT_SQL}
             WHERE is_deleted = 0
             ORDER BY timestamp ASC, id ASC;"
        ))?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?.record);
        }
        Ok(records)
    }

    fn upsert_record(&self, record: &Record, is_deleted: bool) -> StoreResult<()> {
        record.validate()?;

        self.conn.execute(
            "INSERT INTO records (id, timestamp, is_deleted) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                timestamp = excluded.timestamp,
                is_deleted = excluded.is_deleted,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![record.id.to_string(), record.timestamp, bool_to_int(is_deleted)],
        )?;
        Ok(())
    }

    fn count_records(&self) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE is_deleted = 0;",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn parse_record_row(row: &Row<'_>) -> StoreResult<StoredRecord> {
    let id = parse_record_id(&row.get::<_, String>("id")?, "records.id")?;

    let is_deleted = match row.get::<_, i64>("is_deleted")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_deleted value `{other}` in records.is_deleted"
            )));
        }
    };

    let timestamp: i64 = row.get("timestamp")?;
    let record = Record::with_id(id, timestamp).map_err(|err| {
        StoreError::InvalidData(format!("invalid row `{id}` in records: {err}"))
    })?;

    Ok(StoredRecord { record, is_deleted })
}

/// Parses a stored UUID column value.
pub(crate) fn parse_record_id(value: &str, column: &str) -> StoreResult<RecordId> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
