//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `taskii_core` linkage.
//! - Print store and outbox counts for a database file when one is given.
//!
//! Usage: `taskii_cli [DB_PATH]` (falls back to `TASKII_DB_PATH`).

use std::process::ExitCode;
use taskii_core::{RecordStore, StoreConfig, SyncConfig, SyncEngine};

fn main() -> ExitCode {
    println!("taskii_core ping={}", taskii_core::ping());
    println!("taskii_core version={}", taskii_core::core_version());

    let Some(db_path) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TASKII_DB_PATH").ok())
        .filter(|path| !path.trim().is_empty())
    else {
        return ExitCode::SUCCESS;
    };

    match print_stats(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("taskii_core error={message}");
            ExitCode::FAILURE
        }
    }
}

fn print_stats(db_path: &str) -> Result<(), String> {
    let store = RecordStore::open(&StoreConfig::file(db_path)).map_err(|err| err.to_string())?;
    let records = store.count().map_err(|err| err.to_string())?;
    let status = SyncEngine::new(store, SyncConfig::default())
        .status()
        .map_err(|err| err.to_string())?;

    println!("taskii_core db={db_path}");
    println!("taskii_core records={records}");
    println!(
        "taskii_core outbox_pending={} outbox_failed={}",
        status.pending, status.failed
    );
    Ok(())
}
