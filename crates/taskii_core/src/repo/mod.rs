//! Repository layer over the SQLite schema.
//!
//! # Responsibility
//! - Keep SQL details for records and the change journal in one place.
//! - Operate on a borrowed connection so callers own transaction scope.
//!
//! # Invariants
//! - Write paths call `Record::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

pub mod change_log;
pub mod record_repo;
