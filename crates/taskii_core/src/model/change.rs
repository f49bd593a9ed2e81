//! Change notification model for store observation.

use crate::model::record::RecordId;
use serde::{Deserialize, Serialize};

/// Kind of committed record change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Caller-initiated create/update/delete.
    Local,
    /// Merged from the remote backend.
    Remote,
}

/// One entry of the ordered change journal.
///
/// `seq` is strictly increasing in commit order and is the restart cursor
/// for subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: i64,
    pub record_id: RecordId,
    pub kind: ChangeKind,
    pub timestamp: i64,
    pub origin: ChangeOrigin,
}
