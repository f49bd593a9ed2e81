//! Process-wide app lifecycle.
//!
//! # Responsibility
//! - Open the store, wire the sync engine, and publish one `App` handle.
//! - Abort startup cleanly when persisted state cannot be trusted.
//!
//! # Invariants
//! - `initialize` succeeds at most once until `shutdown` runs.
//! - No store or sync operation is reachable through `app()` before
//!   `initialize` returned `Ok`.
//! - `shutdown` stops the background worker before releasing the store.

use crate::config::{AppConfig, ConfigError};
use crate::logging::init_logging_with;
use crate::model::record::{Record, RecordId};
use crate::store::{RecordStore, StoreError, StoreResult};
use crate::sync::backend::RemoteBackend;
use crate::sync::engine::SyncEngine;
use crate::sync::registry::BackendRegistryError;
use crate::sync::worker::SyncWorker;
use log::{error, info};
use once_cell::sync::Lazy;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static APP: Lazy<Mutex<Option<Arc<App>>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug)]
pub enum BootstrapError {
    AlreadyInitialized,
    NotInitialized,
    Config(ConfigError),
    Logging(String),
    /// Fatal: the store is corrupt or from a newer schema.
    StoreCorrupt(StoreError),
    Store(StoreError),
    Backend(BackendRegistryError),
    Worker(std::io::Error),
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "taskii core is already initialized"),
            Self::NotInitialized => write!(f, "taskii core is not initialized"),
            Self::Config(err) => write!(f, "invalid config: {err}"),
            Self::Logging(message) => write!(f, "logging init failed: {message}"),
            Self::StoreCorrupt(err) => write!(f, "store corrupt: {err}"),
            Self::Store(err) => write!(f, "store open failed: {err}"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::Worker(err) => write!(f, "sync worker start failed: {err}"),
        }
    }
}

impl Error for BootstrapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreCorrupt(err) | Self::Store(err) => Some(err),
            Self::Backend(err) => Some(err),
            Self::Worker(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::AlreadyInitialized | Self::NotInitialized | Self::Logging(_) => None,
        }
    }
}

impl From<StoreError> for BootstrapError {
    fn from(value: StoreError) -> Self {
        if value.is_corruption() {
            Self::StoreCorrupt(value)
        } else {
            Self::Store(value)
        }
    }
}

/// Initialized store plus sync wiring.
pub struct App {
    store: RecordStore,
    sync: Arc<SyncEngine>,
    worker: Mutex<Option<SyncWorker>>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

impl App {
    fn open(config: &AppConfig) -> Result<Self, BootstrapError> {
        let store = RecordStore::open(&config.store)?;
        let sync = Arc::new(SyncEngine::new(store.clone(), config.sync.clone()));
        Ok(Self {
            store,
            sync,
            worker: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// Registers `backend` as active and starts the background worker.
    pub fn start_sync(&self, backend: Arc<dyn RemoteBackend>) -> Result<(), BootstrapError> {
        self.sync
            .register_backend(backend)
            .map_err(BootstrapError::Backend)?;

        let mut worker = self.lock_worker();
        if worker.is_none() {
            *worker = Some(SyncWorker::spawn(Arc::clone(&self.sync)).map_err(BootstrapError::Worker)?);
        }
        Ok(())
    }

    pub fn create_record(&self, timestamp: i64) -> StoreResult<Record> {
        let record = self.store.create(timestamp)?;
        self.wake_sync();
        Ok(record)
    }

    pub fn update_record(&self, id: RecordId, timestamp: i64) -> StoreResult<Record> {
        let record = self.store.update(id, timestamp)?;
        self.wake_sync();
        Ok(record)
    }

    pub fn delete_record(&self, id: RecordId) -> StoreResult<()> {
        self.store.delete(id)?;
        self.wake_sync();
        Ok(())
    }

    pub fn wake_sync(&self) {
        if let Some(worker) = self.lock_worker().as_ref() {
            worker.wake();
        }
    }

    /// Cancels in-flight sync calls (app suspension).
    pub fn suspend(&self) {
        if let Some(worker) = self.lock_worker().as_ref() {
            worker.suspend();
        }
    }

    pub fn resume(&self) {
        if let Some(worker) = self.lock_worker().as_ref() {
            worker.resume();
        }
    }

    fn stop_worker(&self) {
        if let Some(worker) = self.lock_worker().take() {
            worker.stop();
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<SyncWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One-time startup. Must run before any store or sync operation.
///
/// # Errors
/// - `AlreadyInitialized` when called twice without `shutdown`.
/// - `Config` when a tunable is out of range.
/// - `StoreCorrupt` when the database fails integrity or version checks;
///   callers must abort startup.
pub fn initialize(config: AppConfig) -> Result<Arc<App>, BootstrapError> {
    let mut slot = lock_slot();
    if slot.is_some() {
        return Err(BootstrapError::AlreadyInitialized);
    }
    config.validate().map_err(BootstrapError::Config)?;

    if let Some(logging) = &config.logging {
        init_logging_with(logging).map_err(BootstrapError::Logging)?;
    }

    let app = match App::open(&config) {
        Ok(app) => Arc::new(app),
        Err(err) => {
            error!("event=bootstrap module=core status=error error={}", err);
            return Err(err);
        }
    };
    *slot = Some(Arc::clone(&app));
    info!("event=bootstrap module=core status=ok");
    Ok(app)
}

/// Returns the initialized app handle.
pub fn app() -> Result<Arc<App>, BootstrapError> {
    lock_slot().clone().ok_or(BootstrapError::NotInitialized)
}

pub fn is_initialized() -> bool {
    lock_slot().is_some()
}

/// Stops background sync and releases the process-wide handle.
///
/// Returns `false` when nothing was initialized.
pub fn shutdown() -> bool {
    let Some(app) = lock_slot().take() else {
        return false;
    };
    app.stop_worker();
    info!("event=shutdown module=core status=ok");
    true
}

fn lock_slot() -> MutexGuard<'static, Option<Arc<App>>> {
    APP.lock().unwrap_or_else(PoisonError::into_inner)
}
