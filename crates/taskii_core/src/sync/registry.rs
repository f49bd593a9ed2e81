//! In-process remote backend registry and active selection.

use crate::sync::backend::{BackendHealth, RemoteBackend};
use crate::sync::types::{RemoteError, RemoteResult, SyncStage};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Backend registration/selection errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRegistryError {
    InvalidBackendId(String),
    DuplicateBackendId(String),
    BackendNotFound(String),
}

impl Display for BackendRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBackendId(value) => write!(f, "backend id is invalid: {value}"),
            Self::DuplicateBackendId(value) => {
                write!(f, "backend id already registered: {value}")
            }
            Self::BackendNotFound(value) => write!(f, "backend not found: {value}"),
        }
    }
}

impl Error for BackendRegistryError {}

/// Registered remote backends with at most one active selection.
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn RemoteBackend>>,
    active_backend_id: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one backend adapter.
    pub fn register(&mut self, backend: Arc<dyn RemoteBackend>) -> Result<(), BackendRegistryError> {
        let backend_id = backend.backend_id().trim().to_string();
        if !is_valid_backend_id(&backend_id) {
            return Err(BackendRegistryError::InvalidBackendId(backend_id));
        }
        if self.backends.contains_key(backend_id.as_str()) {
            return Err(BackendRegistryError::DuplicateBackendId(backend_id));
        }

        self.backends.insert(backend_id, backend);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Returns sorted backend ids.
    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Selects one active backend.
    pub fn select_active(&mut self, backend_id: &str) -> Result<(), BackendRegistryError> {
        let normalized = backend_id.trim();
        if !self.backends.contains_key(normalized) {
            return Err(BackendRegistryError::BackendNotFound(normalized.to_string()));
        }
        self.active_backend_id = Some(normalized.to_string());
        Ok(())
    }

    pub fn clear_active(&mut self) {
        self.active_backend_id = None;
    }

    pub fn active_backend_id(&self) -> Option<&str> {
        self.active_backend_id.as_deref()
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<dyn RemoteBackend>> {
        self.backends.get(backend_id.trim()).cloned()
    }

    pub fn active_backend(&self) -> Option<Arc<dyn RemoteBackend>> {
        let id = self.active_backend_id()?;
        self.get(id)
    }

    pub fn active_health(&self) -> Option<BackendHealth> {
        self.active_backend().map(|backend| backend.health())
    }

    /// Returns the active backend or a `backend_not_selected` error.
    pub fn require_active(&self, stage: SyncStage) -> RemoteResult<Arc<dyn RemoteBackend>> {
        self.active_backend().ok_or_else(|| {
            RemoteError::new(
                "registry",
                stage,
                "backend_not_selected",
                "No active backend selected.",
                true,
            )
        })
    }
}

fn is_valid_backend_id(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
