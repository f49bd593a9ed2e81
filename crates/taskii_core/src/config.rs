//! Runtime configuration for store, sync and logging.
//!
//! # Responsibility
//! - Provide production defaults for every tunable.
//! - Resolve host-provided overrides from environment variables.
//!
//! # Invariants
//! - `SyncConfig::max_attempts` is at least 1.
//! - Backoff delays never exceed `max_backoff_ms`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const DEFAULT_DB_FILE_NAME: &str = "taskii.sqlite3";
const DEFAULT_CHANGE_LOG_RETENTION: u64 = 10_000;

pub const ENV_DB_PATH: &str = "TASKII_DB_PATH";
pub const ENV_LOG_DIR: &str = "TASKII_LOG_DIR";
pub const ENV_LOG_LEVEL: &str = "TASKII_LOG_LEVEL";
pub const ENV_SYNC_MAX_ATTEMPTS: &str = "TASKII_SYNC_MAX_ATTEMPTS";

/// Configuration parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: String, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    File(PathBuf),
    /// Process-private database discarded on shutdown.
    InMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub location: StoreLocation,
    /// When false, local writes are not queued for remote delivery.
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    /// Newest change-journal entries kept when the store opens; `None` keeps
    /// everything.
    #[serde(default = "default_change_log_retention")]
    pub change_log_retention: Option<u64>,
}

impl StoreConfig {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            sync_enabled: true,
            change_log_retention: default_change_log_retention(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::InMemory,
            sync_enabled: true,
            change_log_retention: default_change_log_retention(),
        }
    }
}

/// Retry and scheduling knobs for the sync boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delivery attempts before a mutation is parked as a permanent failure.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Idle interval between background sync cycles.
    pub drain_interval_ms: u64,
    pub pull_batch_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 5_000,
            max_backoff_ms: 5 * 60 * 1_000,
            drain_interval_ms: 45_000,
            pull_batch_size: 100,
        }
    }
}

impl SyncConfig {
    /// Rejects values that would break retry scheduling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sync.max_attempts".to_string(),
                value: self.max_attempts.to_string(),
            });
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(ConfigError::InvalidValue {
                key: "sync.max_backoff_ms".to_string(),
                value: self.max_backoff_ms.to_string(),
            });
        }
        Ok(())
    }

    /// Delay before the attempt following `attempts` consecutive failures.
    ///
    /// Doubles from `base_backoff_ms` and saturates at `max_backoff_ms`.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        const MAX_EXPONENT: u32 = 16;

        let exponent = attempts.saturating_sub(1).min(MAX_EXPONENT);
        self.base_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files.
    pub log_dir: String,
}

/// Complete configuration handed to `bootstrap::initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl AppConfig {
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            sync: SyncConfig::default(),
            logging: None,
        }
    }

    /// Checks every section; `bootstrap::initialize` refuses invalid configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()
    }

    /// Builds configuration from `TASKII_*` environment variables.
    ///
    /// Without `TASKII_DB_PATH` the database lives in the temp directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let db_path = non_empty(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE_NAME));

        let mut sync = SyncConfig::default();
        if let Some(raw) = non_empty(ENV_SYNC_MAX_ATTEMPTS) {
            sync.max_attempts = raw
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: ENV_SYNC_MAX_ATTEMPTS.to_string(),
                    value: raw,
                })?;
        }

        let logging = non_empty(ENV_LOG_DIR).map(|log_dir| LoggingConfig {
            level: non_empty(ENV_LOG_LEVEL)
                .unwrap_or_else(|| crate::logging::default_log_level().to_string()),
            log_dir,
        });

        Ok(Self {
            store: StoreConfig::file(db_path),
            sync,
            logging,
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_change_log_retention() -> Option<u64> {
    Some(DEFAULT_CHANGE_LOG_RETENTION)
}
