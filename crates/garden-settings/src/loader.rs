//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GardenSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `GARDEN_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GardenSettings;

/// Resolve the path to the settings file (`~/.garden/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".garden").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<GardenSettings> {
    let defaults = serde_json::to_value(GardenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GardenSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut GardenSettings) {
    // ── Realtime ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GARDEN_WS_PATH") {
        settings.realtime.path = v;
    }
    if let Some(v) = read_env_u64("GARDEN_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.realtime.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("GARDEN_RECONNECT_BASE_DELAY_MS", 10, 60_000) {
        settings.realtime.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("GARDEN_RECONNECT_MAX_DELAY_MS", 10, 600_000) {
        settings.realtime.max_delay_ms = v;
    }
    if let Some(v) = read_env_u64("GARDEN_MAX_RECONNECT_ATTEMPTS", 0, 100) {
        settings.realtime.max_reconnect_attempts = v as u32;
    }

    // ── Adaptive ────────────────────────────────────────────────────
    if let Some(v) = read_env_bool("GARDEN_ADAPTIVE_ENABLED") {
        settings.adaptive.enabled = v;
    }
    if let Some(v) = read_env_u64("GARDEN_CONTROL_INTERVAL_MS", 16, 60_000) {
        settings.adaptive.control_interval_ms = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("GARDEN_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = read_env_bool("GARDEN_LOG_JSON") {
        settings.telemetry.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, min, max, "invalid u64 env var, ignoring");
    }
    result
}
