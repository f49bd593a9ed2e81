//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose app lifecycle, record CRUD, change polling and sync status to
//!   Dart via FRB.
//! - Keep error semantics simple: envelopes with `ok` + `message`.
//!
//! # Invariants
//! - Exported functions must not panic across the FFI boundary.
//! - Record ids cross the boundary as canonical UUID strings.
//! - Timestamps cross the boundary as Unix epoch milliseconds.

use std::sync::Arc;
use taskii_core::bootstrap::{app, is_initialized};
use taskii_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, initialize,
    ping as ping_inner, shutdown, App, AppConfig, ChangeKind, ChangeOrigin, Record, RecordId,
    StoreConfig, StoreError,
};
use uuid::Uuid;

const CHANGES_DEFAULT_LIMIT: u32 = 100;

/// Minimal health-check API for FRB smoke integration.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Returns empty string on success and the error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Opens the store before any other record call.
///
/// Input semantics:
/// - `db_path`: absolute database file path; blank falls back to
///   `TASKII_DB_PATH` or the temp directory.
/// - `in_memory`: ignore `db_path` and keep data in memory only.
///
/// Returns empty string on success. `store corrupt: ...` messages are fatal
/// and the host must abort startup.
#[flutter_rust_bridge::frb(sync)]
pub fn app_init(db_path: String, in_memory: bool) -> String {
    let mut config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => return err.to_string(),
    };
    if in_memory {
        config.store = StoreConfig::in_memory();
    } else if !db_path.trim().is_empty() {
        config.store = StoreConfig::file(db_path.trim());
    }

    match initialize(config) {
        Ok(_) => String::new(),
        Err(err) => {
            log::error!("event=ffi_app_init module=ffi status=error error={err}");
            err.to_string()
        }
    }
}

/// Stops sync and releases the store. Returns `false` if nothing was open.
#[flutter_rust_bridge::frb(sync)]
pub fn app_shutdown() -> bool {
    shutdown()
}

#[flutter_rust_bridge::frb(sync)]
pub fn app_is_initialized() -> bool {
    is_initialized()
}

/// Cancels in-flight sync calls when the app moves to background.
#[flutter_rust_bridge::frb(sync)]
pub fn app_suspend() {
    if let Ok(app) = app() {
        app.suspend();
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn app_resume() {
    if let Ok(app) = app() {
        app.resume();
    }
}

/// Record shape exposed to Dart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordItem {
    pub id: String,
    pub timestamp_ms: i64,
}

/// Generic record response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordResponse {
    pub ok: bool,
    /// `true` when the id did not match a live record.
    pub not_found: bool,
    pub record: Option<RecordItem>,
    pub message: String,
}

impl RecordResponse {
    fn success(message: impl Into<String>, record: Option<Record>) -> Self {
        Self {
            ok: true,
            not_found: false,
            record: record.map(to_record_item),
            message: message.into(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            ok: false,
            not_found: true,
            record: None,
            message: format!("record not found: {id}"),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            not_found: false,
            record: None,
            message: message.into(),
        }
    }

    fn from_store_error(op: &str, id: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::not_found(id),
            other => Self::failure(format!("{op} failed: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordListResponse {
    pub ok: bool,
    pub items: Vec<RecordItem>,
    pub message: String,
}

#[flutter_rust_bridge::frb(sync)]
pub fn record_create(timestamp_ms: i64) -> RecordResponse {
    match with_app(|app| app.create_record(timestamp_ms)) {
        Ok(record) => RecordResponse::success("Record created.", Some(record)),
        Err(message) => RecordResponse::failure(format!("record_create failed: {message}")),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn record_get(id: String) -> RecordResponse {
    let record_id = match parse_id(&id) {
        Ok(record_id) => record_id,
        Err(response) => return response,
    };
    match with_app(|app| app.store().read(record_id)) {
        Ok(Some(record)) => RecordResponse::success("Record loaded.", Some(record)),
        Ok(None) => RecordResponse::not_found(&id),
        Err(message) => RecordResponse::failure(format!("record_get failed: {message}")),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn record_update(id: String, timestamp_ms: i64) -> RecordResponse {
    let record_id = match parse_id(&id) {
        Ok(record_id) => record_id,
        Err(response) => return response,
    };
    let app = match app() {
        Ok(app) => app,
        Err(err) => return RecordResponse::failure(err.to_string()),
    };
    match app.update_record(record_id, timestamp_ms) {
        Ok(record) => RecordResponse::success("Record updated.", Some(record)),
        Err(err) => RecordResponse::from_store_error("record_update", &id, err),
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn record_delete(id: String) -> RecordResponse {
    let record_id = match parse_id(&id) {
        Ok(record_id) => record_id,
        Err(response) => return response,
    };
    let app = match app() {
        Ok(app) => app,
        Err(err) => return RecordResponse::failure(err.to_string()),
    };
    match app.delete_record(record_id) {
        Ok(()) => RecordResponse::success("Record deleted.", None),
        Err(err) => RecordResponse::from_store_error("record_delete", &id, err),
    }
}

/// Lists live records ordered by timestamp.
#[flutter_rust_bridge::frb(sync)]
pub fn record_list() -> RecordListResponse {
    match with_app(|app| app.store().list()) {
        Ok(records) => RecordListResponse {
            ok: true,
            message: format!("Found {} record(s).", records.len()),
            items: records.into_iter().map(to_record_item).collect(),
        },
        Err(message) => RecordListResponse {
            ok: false,
            items: Vec::new(),
            message: format!("record_list failed: {message}"),
        },
    }
}

/// One change notification for Dart-side observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeItem {
    pub seq: i64,
    pub record_id: String,
    /// `insert|update|delete`.
    pub kind: String,
    pub timestamp_ms: i64,
    /// `local|remote`.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatchResponse {
    pub ok: bool,
    pub items: Vec<ChangeItem>,
    /// Pass back as `after_seq` on the next poll.
    pub last_seq: i64,
    pub message: String,
}

/// Returns committed changes after `after_seq` (0 = full history).
#[flutter_rust_bridge::frb(sync)]
pub fn changes_since(after_seq: i64, limit: Option<u32>) -> ChangeBatchResponse {
    let limit = match limit {
        Some(0) | None => CHANGES_DEFAULT_LIMIT,
        Some(value) => value.min(CHANGES_DEFAULT_LIMIT),
    } as usize;

    let polled = with_app(|app| {
        let mut subscription = app.store().subscribe(Some(after_seq))?;
        subscription.poll()
    });
    match polled {
        Ok(events) => {
            let items: Vec<ChangeItem> = events
                .into_iter()
                .take(limit)
                .map(|event| ChangeItem {
                    seq: event.seq,
                    record_id: event.record_id.to_string(),
                    kind: change_kind_label(event.kind).to_string(),
                    timestamp_ms: event.timestamp,
                    origin: change_origin_label(event.origin).to_string(),
                })
                .collect();
            ChangeBatchResponse {
                ok: true,
                last_seq: items.last().map_or(after_seq, |item| item.seq),
                message: format!("{} change(s).", items.len()),
                items,
            }
        }
        Err(message) => ChangeBatchResponse {
            ok: false,
            items: Vec::new(),
            last_seq: after_seq,
            message: format!("changes_since failed: {message}"),
        },
    }
}

/// Pending-changes indicator for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatusResponse {
    pub ok: bool,
    pub pending: u64,
    pub failed: u64,
    pub has_pending_changes: bool,
    pub last_error: Option<String>,
    pub message: String,
}

#[flutter_rust_bridge::frb(sync)]
pub fn sync_status() -> SyncStatusResponse {
    match with_app(|app| app.sync().status()) {
        Ok(status) => SyncStatusResponse {
            ok: true,
            pending: status.pending,
            failed: status.failed,
            has_pending_changes: status.has_pending_changes(),
            last_error: status.last_error,
            message: String::new(),
        },
        Err(message) => SyncStatusResponse {
            ok: false,
            pending: 0,
            failed: 0,
            has_pending_changes: false,
            last_error: None,
            message: format!("sync_status failed: {message}"),
        },
    }
}

/// Parked sync failure shown to the user until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailureItem {
    pub seq: i64,
    pub record_id: String,
    pub attempts: u32,
    pub error: String,
}

#[flutter_rust_bridge::frb(sync)]
pub fn sync_failures() -> Vec<SyncFailureItem> {
    with_app(|app| app.sync().failures())
        .map(|failures| {
            failures
                .into_iter()
                .map(|failure| SyncFailureItem {
                    seq: failure.seq,
                    record_id: failure.mutation.record_id.to_string(),
                    attempts: failure.attempts,
                    error: failure.error,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Acknowledges one parked failure. Returns empty string on success.
#[flutter_rust_bridge::frb(sync)]
pub fn sync_acknowledge_failure(seq: i64) -> String {
    match app() {
        Ok(app) => match app.sync().acknowledge_failure(seq) {
            Ok(()) => String::new(),
            Err(err) => err.to_string(),
        },
        Err(err) => err.to_string(),
    }
}

fn with_app<T>(
    f: impl FnOnce(&Arc<App>) -> taskii_core::StoreResult<T>,
) -> Result<T, String> {
    let app = app().map_err(|err| err.to_string())?;
    f(&app).map_err(|err| err.to_string())
}

fn parse_id(id: &str) -> Result<RecordId, RecordResponse> {
    Uuid::parse_str(id.trim())
        .map_err(|_| RecordResponse::failure(format!("invalid record id `{}`", id.trim())))
}

fn to_record_item(record: Record) -> RecordItem {
    RecordItem {
        id: record.id.to_string(),
        timestamp_ms: record.timestamp,
    }
}

fn change_kind_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Insert => "insert",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
    }
}

fn change_origin_label(origin: ChangeOrigin) -> &'static str {
    match origin {
        ChangeOrigin::Local => "local",
        ChangeOrigin::Remote => "remote",
    }
}

#[cfg(test)]
mod tests {
    use super::{
        app_init, app_is_initialized, changes_since, core_version, init_logging, ping,
        record_create, record_delete, record_get, record_list, record_update, sync_status,
    };
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_app() {
        INIT.call_once(|| {
            let message = app_init(String::new(), true);
            assert!(message.is_empty(), "{message}");
        });
        assert!(app_is_initialized());
    }

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_bad_input() {
        assert!(!init_logging("info".to_string(), String::new()).is_empty());
        assert!(!init_logging("verbose".to_string(), "tmp/logs".to_string()).is_empty());
    }

    #[test]
    fn record_crud_roundtrip() {
        ensure_app();

        let created = record_create(1_700_000_000_000);
        assert!(created.ok, "{}", created.message);
        let id = created.record.expect("created record").id;

        let loaded = record_get(id.clone());
        assert_eq!(loaded.record.map(|r| r.timestamp_ms), Some(1_700_000_000_000));

        let updated = record_update(id.clone(), 1_700_000_100_000);
        assert!(updated.ok, "{}", updated.message);
        assert!(record_list().items.iter().any(|item| item.id == id));

        assert!(record_delete(id.clone()).ok);
        let missing = record_get(id.clone());
        assert!(missing.not_found);
        assert!(record_update(id, 1).not_found);
    }

    #[test]
    fn invalid_id_is_rejected_without_not_found() {
        ensure_app();

        let response = record_get("not-a-uuid".to_string());
        assert!(!response.ok);
        assert!(!response.not_found);
        assert!(response.message.contains("invalid record id"));
    }

    #[test]
    fn changes_since_reports_new_writes_and_cursor() {
        ensure_app();
        let head = changes_since(0, Some(u32::MAX));
        assert!(head.ok, "{}", head.message);

        let mut cursor = head.last_seq;
        loop {
            let batch = changes_since(cursor, None);
            if batch.items.is_empty() {
                break;
            }
            cursor = batch.last_seq;
        }

        let created = record_create(42);
        let id = created.record.expect("created record").id;
        let batch = changes_since(cursor, None);
        assert!(batch
            .items
            .iter()
            .any(|item| item.record_id == id && item.kind == "insert" && item.origin == "local"));
        assert!(batch.last_seq > cursor);
    }

    #[test]
    fn sync_status_reports_pending_changes_without_backend() {
        ensure_app();
        record_create(7);

        let status = sync_status();
        assert!(status.ok, "{}", status.message);
        assert!(status.has_pending_changes);
    }
}
