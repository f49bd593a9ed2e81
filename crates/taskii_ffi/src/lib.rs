//! Flutter-facing FFI facade over `taskii_core`.

pub mod api;
