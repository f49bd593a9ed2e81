//! Remote backend seam.
//!
//! Hosts implement `RemoteBackend` over their networked service (auth,
//! structured storage, live database). Core only relies on push/pull and
//! cooperative cancellation.

use crate::sync::types::{Mutation, PushAck, RemotePage, RemoteResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared with in-flight backend calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Remote health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendHealth {
    Healthy,
    Degraded,
    Unavailable,
}

/// Remote service adapter contract.
///
/// Implementations should return `RemoteError::cancelled` promptly once
/// `cancel.is_cancelled()` turns true.
pub trait RemoteBackend: Send + Sync {
    fn backend_id(&self) -> &str;

    fn health(&self) -> BackendHealth {
        BackendHealth::Healthy
    }

    /// Delivers one mutation. Must be idempotent per `(record_id, timestamp)`.
    fn push(&self, mutation: &Mutation, cancel: &CancelToken) -> RemoteResult<PushAck>;

    /// Fetches remote changes after `cursor` (`None` = from the beginning).
    fn pull(
        &self,
        cursor: Option<&str>,
        limit: u32,
        cancel: &CancelToken,
    ) -> RemoteResult<RemotePage>;
}
