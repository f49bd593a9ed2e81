//! Sync boundary between the local store and a remote backend.
//!
//! # Responsibility
//! - Queue locally committed mutations (`outbox`) and deliver them
//!   (`engine::SyncEngine::drain`) in order with exponential backoff.
//! - Merge remote changes with last-writer-wins (`engine::SyncEngine::pull`).
//! - Run delivery off the caller's thread (`worker::SyncWorker`).
//!
//! # Invariants
//! - Every locally committed mutation stays queued until acknowledged,
//!   superseded by a newer remote state, or acknowledged as a failure.

pub mod backend;
pub mod clock;
pub mod engine;
pub mod outbox;
pub mod registry;
pub mod types;
pub mod worker;
