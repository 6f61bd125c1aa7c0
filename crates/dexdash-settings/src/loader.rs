//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::DashSettings;

/// `~/.dexdash`, or `/tmp/.dexdash` when `HOME` is unset.
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dexdash")
}

/// Resolve the path to the settings file (`~/.dexdash/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DashSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DashSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<DashSettings> {
    let defaults = serde_json::to_value(DashSettings::default())?;

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

/// Apply `DEXDASH_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning, leaving the file/default value.
pub fn apply_overrides(settings: &mut DashSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("DEXDASH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("DEXDASH_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "DEXDASH_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = read("DEXDASH_ANALYTICS_URL") {
        settings.analytics.url = v;
    }
    if let Some(v) = read("DEXDASH_DB_PATH") {
        settings.storage.db_path = PathBuf::from(v);
    }
    if let Some(v) = read("DEXDASH_REFRESH_INTERVAL_MS") {
        match parse_u64_range(&v, 100, 3_600_000) {
            Some(n) => settings.cache.refresh_interval_ms = n,
            None => warn!(key = "DEXDASH_REFRESH_INTERVAL_MS", value = %v, "invalid u64 env var, ignoring"),
        }
    }
    if let Some(v) = read("DEXDASH_REQUEST_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(n) => settings.rpc.request_timeout_ms = n,
            None => warn!(key = "DEXDASH_REQUEST_TIMEOUT_MS", value = %v, "invalid u64 env var, ignoring"),
        }
    }
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
