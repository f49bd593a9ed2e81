//! Sync boundary data contracts shared by engine, outbox and backends.

use crate::model::record::RecordId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Outbound mutation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl MutationOp {
    /// Folds a newer operation onto a still-pending older one for the same id.
    ///
    /// The remote never saw a pending `Create`, so a later `Update` must still
    /// be delivered as `Create`.
    pub fn coalesce(previous: Option<Self>, next: Self) -> Self {
        match (previous, next) {
            (Some(Self::Create), Self::Update) => Self::Create,
            (_, next) => next,
        }
    }
}

/// One locally committed change waiting for remote delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub record_id: RecordId,
    pub op: MutationOp,
    /// Record timestamp at commit time. For deletes, the last live value.
    pub timestamp: i64,
}

/// Queued outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    /// Queue position; strictly increasing, reassigned on coalesce.
    pub seq: i64,
    pub mutation: Mutation,
    pub attempts: u32,
    pub next_attempt_at_ms: i64,
    pub last_error: Option<String>,
}

/// Mutation parked after exhausting retries or a permanent rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermanentFailure {
    pub seq: i64,
    pub mutation: Mutation,
    pub attempts: u32,
    pub error: String,
}

/// Remote operation on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    Upsert,
    Delete,
}

/// Incoming change from the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub record_id: RecordId,
    pub op: RemoteOp,
    /// Last-writer-wins key.
    pub timestamp: i64,
}

/// Result of merging one remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Remote change won and was written locally.
    Applied,
    /// Local state is newer; remote change dropped.
    KeptLocal,
    /// Remote delete for a record never seen locally.
    Ignored,
}

/// Backend acknowledgement for one pushed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushAck {
    /// Opaque remote revision, when the backend reports one.
    pub remote_revision: Option<String>,
}

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemotePage {
    pub changes: Vec<RemoteChange>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Pipeline stage for remote errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Push,
    Pull,
}

/// Remote backend error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub backend_id: String,
    pub stage: SyncStage,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub cancelled: bool,
}

impl RemoteError {
    pub fn new(
        backend_id: impl Into<String>,
        stage: SyncStage,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            stage,
            code: code.into(),
            message: message.into(),
            retryable,
            cancelled: false,
        }
    }

    /// Transient network/service failure.
    pub fn unavailable(backend_id: impl Into<String>, stage: SyncStage, message: impl Into<String>) -> Self {
        Self::new(backend_id, stage, "unavailable", message, true)
    }

    /// Call aborted through its `CancelToken`.
    pub fn cancelled(backend_id: impl Into<String>, stage: SyncStage) -> Self {
        let mut err = Self::new(backend_id, stage, "cancelled", "operation cancelled", true);
        err.cancelled = true;
        err
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}:{:?}] {}: {}",
            self.backend_id, self.stage, self.code, self.message
        )
    }
}

impl Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Snapshot for the presentation layer's "pending changes" indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncStatus {
    pub backend_id: Option<String>,
    pub pending: u64,
    pub failed: u64,
    pub next_retry_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub remote_cursor: Option<String>,
}

impl SyncStatus {
    pub fn has_pending_changes(&self) -> bool {
        self.pending > 0
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub delivered: usize,
    pub parked: usize,
    /// Set when the head entry is waiting for its backoff window.
    pub deferred_until_ms: Option<i64>,
    pub last_error: Option<RemoteError>,
    pub cancelled: bool,
    /// Another drain was already running; nothing was attempted.
    pub skipped: bool,
}

/// Summary of one pull pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullReport {
    pub received: usize,
    pub applied: usize,
    /// Remote changes skipped because they fail record validation.
    pub rejected: usize,
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::MutationOp;

    #[test]
    fn coalesce_keeps_create_for_later_update() {
        assert_eq!(
            MutationOp::coalesce(Some(MutationOp::Create), MutationOp::Update),
            MutationOp::Create
        );
        assert_eq!(
            MutationOp::coalesce(Some(MutationOp::Create), MutationOp::Delete),
            MutationOp::Delete
        );
        assert_eq!(
            MutationOp::coalesce(Some(MutationOp::Update), MutationOp::Update),
            MutationOp::Update
        );
        assert_eq!(MutationOp::coalesce(None, MutationOp::Update), MutationOp::Update);
    }
}
