//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`
//! so a partial file only needs the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrandSettings {
    /// Event cache database.
    pub store: StoreSettings,
    /// Scrollback tuning.
    pub backfill: BackfillSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl StrandSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "store.poolSize must be at least 1".into(),
            ));
        }
        if self.backfill.page_size == 0 {
            return Err(SettingsError::InvalidValue(
                "backfill.pageSize must be at least 1".into(),
            ));
        }
        if self.store.path.trim().is_empty() {
            return Err(SettingsError::InvalidValue("store.path is empty".into()));
        }
        Ok(())
    }
}

/// Event cache database settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file. A leading `~/` expands to the home directory.
    pub path: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// `SQLite` page cache in KiB.
    pub cache_size_kib: i64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "~/.strand/cache.db".to_string(),
            pool_size: 1,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

impl StoreSettings {
    /// `path` with `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

/// Scrollback settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackfillSettings {
    /// Wait after a failed fetch before the next attempt, in milliseconds.
    pub retry_cooldown_ms: u64,
    /// Events requested per page when preloading.
    pub page_size: u32,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            retry_cooldown_ms: 3000,
            page_size: 50,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub(crate) fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}
