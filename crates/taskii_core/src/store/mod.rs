//! Local record store.
//!
//! # Responsibility
//! - Own the authoritative local collection of records keyed by id.
//! - Run every write as one SQLite transaction covering the record row, the
//!   change journal and the outbound sync queue.
//! - Expose restartable change observation.
//!
//! # Invariants
//! - Writers serialize per record id, never store-wide.
//! - Readers check out their own connection and never wait on row locks.

mod error;
mod feed;
mod locks;
mod pool;
mod record_store;

pub use error::{StoreError, StoreResult};
pub use feed::Subscription;
pub use record_store::RecordStore;
