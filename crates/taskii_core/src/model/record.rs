//! Record domain model.
//!
//! # Responsibility
//! - Define the single persisted entity shared by store, sync and FFI.
//! - Validate record state before persistence.
//!
//! # Invariants
//! - `id` is assigned once at creation and never reused.
//! - `timestamp` is Unix epoch milliseconds and never negative.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for every record.
pub type RecordId = Uuid;

/// Validation errors for record invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    NilId,
    NegativeTimestamp(i64),
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "record id must not be nil"),
            Self::NegativeTimestamp(value) => {
                write!(f, "record timestamp must be >= 0, got {value}")
            }
        }
    }
}

impl Error for RecordValidationError {}

/// Persisted timestamped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable ID used for sync mapping.
    pub id: RecordId,
    /// Unix epoch milliseconds. Also the last-writer-wins key during merges.
    pub timestamp: i64,
}

impl Record {
    /// Creates a record with a freshly generated ID.
    pub fn new(timestamp: i64) -> Result<Self, RecordValidationError> {
        Self::with_id(Uuid::new_v4(), timestamp)
    }

    /// Creates a record with a caller-provided ID.
    ///
    /// Used by remote merge paths where identity already exists externally.
    pub fn with_id(id: RecordId, timestamp: i64) -> Result<Self, RecordValidationError> {
        let record = Self { id, timestamp };
        record.validate()?;
        Ok(record)
    }

    /// Checks record invariants.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.id.is_nil() {
            return Err(RecordValidationError::NilId);
        }
        if self.timestamp < 0 {
            return Err(RecordValidationError::NegativeTimestamp(self.timestamp));
        }
        Ok(())
    }
}
