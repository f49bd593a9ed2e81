//! Domain model for persisted Taskii records.
//!
//! # Responsibility
//! - Define canonical data structures used by store and sync logic.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId`.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod change;
pub mod record;
