//! Change journal persistence.
//!
//! The journal backs restartable observation: every committed write appends
//! one row inside the same transaction, so `seq` order equals commit order.
//! Old rows are compacted away; `AUTOINCREMENT` keeps `seq` from being reused.

use crate::model::change::{ChangeEvent, ChangeKind, ChangeOrigin};
use crate::model::record::RecordId;
use crate::repo::record_repo::parse_record_id;
use crate::store::{StoreError, StoreResult};
use rusqlite::{params, Connection};

/// Appends one change row and returns its sequence number.
pub fn append_change(
    conn: &Connection,
    record_id: RecordId,
    kind: ChangeKind,
    timestamp: i64,
    origin: ChangeOrigin,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO change_log (record_id, kind, timestamp, origin) VALUES (?1, ?2, ?3, ?4);",
        params![
            record_id.to_string(),
            change_kind_to_db(kind),
            timestamp,
            origin_to_db(origin),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns up to `limit` changes with `seq > after_seq`, oldest first.
pub fn changes_after(conn: &Connection, after_seq: i64, limit: u32) -> StoreResult<Vec<ChangeEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT seq, record_id, kind, timestamp, origin
         FROM change_log
         WHERE seq > ?1
         ORDER BY seq ASC
         LIMIT ?2;",
    )?;

    let mut rows = stmt.query(params![after_seq, i64::from(limit)])?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get("kind")?;
        let kind = parse_change_kind(&kind_text).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid change kind `{kind_text}` in change_log.kind"))
        })?;
        let origin_text: String = row.get("origin")?;
        let origin = parse_origin(&origin_text).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "invalid change origin `{origin_text}` in change_log.origin"
            ))
        })?;

        events.push(ChangeEvent {
            seq: row.get("seq")?,
            record_id: parse_record_id(&row.get::<_, String>("record_id")?, "change_log.record_id")?,
            kind,
            timestamp: row.get("timestamp")?,
            origin,
        });
    }
    Ok(events)
}

/// Deletes journal rows with `seq < before_seq`.
pub fn delete_changes_before(conn: &Connection, before_seq: i64) -> StoreResult<usize> {
    let removed = conn.execute("DELETE FROM change_log WHERE seq < ?1;", [before_seq])?;
    Ok(removed)
}

/// Returns the newest committed sequence number, or 0 for an empty journal.
pub fn latest_seq(conn: &Connection) -> StoreResult<i64> {
    let seq: Option<i64> = conn.query_row("SELECT MAX(seq) FROM change_log;", [], |row| row.get(0))?;
    Ok(seq.unwrap_or(0))
}

fn change_kind_to_db(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Insert => "insert",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
    }
}

fn parse_change_kind(value: &str) -> Option<ChangeKind> {
    match value {
        "insert" => Some(ChangeKind::Insert),
        "update" => Some(ChangeKind::Update),
        "delete" => Some(ChangeKind::Delete),
        _ => None,
    }
}

fn origin_to_db(origin: ChangeOrigin) -> &'static str {
    match origin {
        ChangeOrigin::Local => "local",
        ChangeOrigin::Remote => "remote",
    }
}

fn parse_origin(value: &str) -> Option<ChangeOrigin> {
    match value {
        "local" => Some(ChangeOrigin::Local),
        "remote" => Some(ChangeOrigin::Remote),
        _ => None,
    }
}
