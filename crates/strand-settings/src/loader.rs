//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StrandSettings::default()`]
//! 2. If `~/.strand/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `STRAND_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{StrandSettings, home_dir};

/// Resolve the path to the settings file (`~/.strand/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".strand").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StrandSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value the engine cannot
/// run with is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StrandSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<StrandSettings> {
    let defaults = serde_json::to_value(StrandSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are warned about and ignored.
pub fn apply_env_overrides(settings: &mut StrandSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Split out so tests need not touch
/// the process environment.
pub fn apply_overrides(settings: &mut StrandSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("STRAND_DB_PATH") {
        settings.store.path = v;
    }
    if let Some(v) = read("STRAND_POOL_SIZE").and_then(|v| checked("STRAND_POOL_SIZE", &v, parse_u32_range(&v, 1, 64))) {
        settings.store.pool_size = v;
    }
    if let Some(v) = read("STRAND_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("STRAND_LOG_JSON").and_then(|v| checked("STRAND_LOG_JSON", &v, parse_bool(&v))) {
        settings.logging.json = v;
    }
    if let Some(v) = read("STRAND_RETRY_COOLDOWN_MS")
        .and_then(|v| checked("STRAND_RETRY_COOLDOWN_MS", &v, parse_u64_range(&v, 0, 600_000)))
    {
        settings.backfill.retry_cooldown_ms = v;
    }
    if let Some(v) = read("STRAND_PAGE_SIZE")
        .and_then(|v| checked("STRAND_PAGE_SIZE", &v, parse_u32_range(&v, 1, 1000)))
    {
        settings.backfill.page_size = v;
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
