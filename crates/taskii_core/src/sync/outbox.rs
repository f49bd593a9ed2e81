//! Outbound mutation queue persisted in `sync_outbox`.
//!
//! # Responsibility
//! - Coalesce pending mutations per record id, keeping the latest payload.
//! - Track delivery attempts, backoff windows and parked failures.
//! - Persist sync bookkeeping (`sync_state`) such as the pull cursor.
//!
//! # Invariants
//! - At most one `pending` row per record id (partial unique index).
//! - Rows leave the queue only on acknowledgement, supersession, or explicit
//!   failure acknowledgement.

use crate::model::record::RecordId;
use crate::repo::record_repo::parse_record_id;
use crate::store::{StoreError, StoreResult};
use crate::sync::types::{Mutation, MutationOp, OutboxEntry, PermanentFailure};
use rusqlite::{params, Connection, OptionalExtension, Row};

const ENTRY_SELECT_SQL: &str = "SELECT
    seq,
    record_id,
    op,
    timestamp,
    attempts,
    next_attempt_at,
    last_error
FROM sync_outbox";

pub(crate) const REMOTE_CURSOR_KEY: &str = "remote_cursor";
pub(crate) const LAST_ERROR_KEY: &str = "last_error";

/// Appends `mutation`, coalescing with any pending row for the same id.
///
/// Returns the queue sequence assigned to the surviving entry.
pub fn enqueue(conn: &Connection, mutation: &Mutation) -> StoreResult<i64> {
    let id_text = mutation.record_id.to_string();
    let previous = conn
        .query_row(
            "SELECT op, attempts, next_attempt_at
             FROM sync_outbox
             WHERE record_id = ?1 AND state = 'pending';",
            [id_text.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let (previous_op, attempts, next_attempt_at) = match previous {
        Some((op_text, attempts, next_attempt_at)) => {
            (Some(parse_op(&op_text)?), attempts, next_attempt_at)
        }
        None => (None, 0, 0),
    };
    let op = MutationOp::coalesce(previous_op, mutation.op);

    conn.execute(
        "DELETE FROM sync_outbox WHERE record_id = ?1 AND state = 'pending';",
        [id_text.as_str()],
    )?;
    conn.execute(
        "INSERT INTO sync_outbox (record_id, op, timestamp, state, attempts, next_attempt_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5);",
        params![id_text, op_to_db(op), mutation.timestamp, attempts, next_attempt_at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Returns the oldest pending entry.
pub fn next_pending(conn: &Connection) -> StoreResult<Option<OutboxEntry>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{ENTRY_SELECT_SQL}
         WHERE state = 'pending'
         ORDER BY seq ASC
         LIMIT 1;"
    ))?;
    let entry = stmt.query_row([], |row| Ok(parse_entry_row(row))).optional()?;
    entry.transpose()
}

/// Lists pending entries in delivery order.
pub fn list_pending(conn: &Connection) -> StoreResult<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{ENTRY_SELECT_SQL}
         WHERE state = 'pending'
         ORDER BY seq ASC;"
    ))?;
    let mut rows = stmt.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(parse_entry_row(row)?);
    }
    Ok(entries)
}

/// Removes a delivered entry. Returns `false` when it was coalesced meanwhile.
///
/// A local write during the push folds into a new pending row for the same
/// record. When the delivered entry was a `Create`, that row is downgraded to
/// `Update` because the remote now has the record.
pub fn acknowledge(conn: &Connection, entry: &OutboxEntry) -> StoreResult<bool> {
    let changed = conn.execute(
        "DELETE FROM sync_outbox WHERE seq = ?1 AND state = 'pending';",
        [entry.seq],
    )?;
    if changed > 0 {
        return Ok(true);
    }

    if entry.mutation.op == MutationOp::Create {
        conn.execute(
            "UPDATE sync_outbox
             SET op = 'update'
             WHERE record_id = ?1 AND state = 'pending' AND op = 'create';",
            [entry.mutation.record_id.to_string()],
        )?;
    }
    Ok(false)
}

/// Records a failed attempt and the earliest time of the next one.
pub fn schedule_retry(
    conn: &Connection,
    seq: i64,
    attempts: u32,
    next_attempt_at_ms: i64,
    error: &str,
) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE sync_outbox
         SET attempts = ?1, next_attempt_at = ?2, last_error = ?3
         WHERE seq = ?4 AND state = 'pending';",
        params![attempts, next_attempt_at_ms, error, seq],
    )?;
    Ok(changed > 0)
}

/// Parks an entry as a permanent failure.
///
/// Returns `false` when the entry was coalesced into a newer row meanwhile;
/// nothing is parked then.
pub fn mark_failed(conn: &Connection, seq: i64, attempts: u32, error: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE sync_outbox
         SET state = 'failed', attempts = ?1, last_error = ?2
         WHERE seq = ?3 AND state = 'pending';",
        params![attempts, error, seq],
    )?;
    Ok(changed > 0)
}

/// Lists parked failures, oldest first.
pub fn list_failures(conn: &Connection) -> StoreResult<Vec<PermanentFailure>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{ENTRY_SELECT_SQL}
         WHERE state = 'failed'
         ORDER BY seq ASC;"
    ))?;
    let mut rows = stmt.query([])?;
    let mut failures = Vec::new();
    while let Some(row) = rows.next()? {
        let entry = parse_entry_row(row)?;
        failures.push(PermanentFailure {
            seq: entry.seq,
            mutation: entry.mutation,
            attempts: entry.attempts,
            error: entry.last_error.unwrap_or_default(),
        });
    }
    Ok(failures)
}

/// Removes a parked failure after the caller acknowledged it.
pub fn acknowledge_failure(conn: &Connection, seq: i64) -> StoreResult<bool> {
    let changed = conn.execute(
        "DELETE FROM sync_outbox WHERE seq = ?1 AND state = 'failed';",
        [seq],
    )?;
    Ok(changed > 0)
}

/// Returns the op of the pending entry for `record_id`, if any.
pub fn pending_op(conn: &Connection, record_id: RecordId) -> StoreResult<Option<MutationOp>> {
    let op_text = conn
        .query_row(
            "SELECT op FROM sync_outbox WHERE record_id = ?1 AND state = 'pending';",
            [record_id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    op_text.as_deref().map(parse_op).transpose()
}

/// Drops pending work for `record_id` after a newer remote state won.
pub fn supersede(conn: &Connection, record_id: RecordId) -> StoreResult<usize> {
    let changed = conn.execute(
        "DELETE FROM sync_outbox WHERE record_id = ?1 AND state = 'pending';",
        [record_id.to_string()],
    )?;
    Ok(changed)
}

/// Returns `(pending, failed)` queue sizes.
pub fn counts(conn: &Connection) -> StoreResult<(u64, u64)> {
    let (pending, failed): (i64, i64) = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0)
         FROM sync_outbox;",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((
        u64::try_from(pending).unwrap_or_default(),
        u64::try_from(failed).unwrap_or_default(),
    ))
}

/// Earliest scheduled retry among pending entries that already failed once.
pub fn next_retry_at(conn: &Connection) -> StoreResult<Option<i64>> {
    let value: Option<i64> = conn.query_row(
        "SELECT MIN(next_attempt_at) FROM sync_outbox WHERE state = 'pending' AND attempts > 0;",
        [],
        |row| row.get(0),
    )?;
    Ok(value)
}

pub fn get_state(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM sync_state WHERE key = ?1;", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

pub fn set_state(conn: &Connection, key: &str, value: Option<&str>) -> StoreResult<()> {
    match value {
        Some(value) => conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?,
        None => conn.execute("DELETE FROM sync_state WHERE key = ?1;", [key])?,
    };
    Ok(())
}

fn parse_entry_row(row: &Row<'_>) -> StoreResult<OutboxEntry> {
    let record_id = parse_record_id(&row.get::<_, String>("record_id")?, "sync_outbox.record_id")?;
    let op = parse_op(&row.get::<_, String>("op")?)?;
    Ok(OutboxEntry {
        seq: row.get("seq")?,
        mutation: Mutation {
            record_id,
            op,
            timestamp: row.get("timestamp")?,
        },
        attempts: row.get("attempts")?,
        next_attempt_at_ms: row.get("next_attempt_at")?,
        last_error: row.get("last_error")?,
    })
}

fn op_to_db(op: MutationOp) -> &'static str {
    match op {
        MutationOp::Create => "create",
        MutationOp::Update => "update",
        MutationOp::Delete => "delete",
    }
}

fn parse_op(value: &str) -> StoreResult<MutationOp> {
    match value {
        "create" => Ok(MutationOp::Create),
        "update" => Ok(MutationOp::Update),
        "delete" => Ok(MutationOp::Delete),
        other => Err(StoreError::InvalidData(format!(
            "invalid mutation op `{other}` in sync_outbox.op"
        ))),
    }
}
