//! Core domain logic for Taskii.
//! This crate is the single source of truth for record and sync invariants.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;
pub mod sync;

pub use bootstrap::{initialize, shutdown, App, BootstrapError};
pub use config::{AppConfig, ConfigError, LoggingConfig, StoreConfig, StoreLocation, SyncConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::change::{ChangeEvent, ChangeKind, ChangeOrigin};
pub use model::record::{Record, RecordId, RecordValidationError};
pub use store::{RecordStore, StoreError, StoreResult, Subscription};
pub use sync::backend::{BackendHealth, CancelToken, RemoteBackend};
pub use sync::engine::{CycleReport, SyncEngine, SyncError, SyncResult};
pub use sync::types::{
    DrainReport, MergeOutcome, Mutation, MutationOp, OutboxEntry, PermanentFailure, PullReport,
    PushAck, RemoteChange, RemoteError, RemoteOp, RemotePage, RemoteResult, SyncStage, SyncStatus,
};
pub use sync::worker::SyncWorker;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
