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
use crate::types::{LivehubSettings, LogFormat};

/// Resolve the path to the settings file (`~/.livehub/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livehub").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LivehubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults. Invalid JSON and settings that fail
/// [`LivehubSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<LivehubSettings> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with<F>(path: &Path, lookup: F) -> Result<LivehubSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(LivehubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LivehubSettings = serde_json::from_value(merged)?;
    apply_overrides_with(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
///
/// Invalid values are ignored with a warning and leave the file/default
/// value in place.
pub fn apply_env_overrides(settings: &mut LivehubSettings) {
    apply_overrides_with(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides_with<F>(settings: &mut LivehubSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // `PORT` is the platform convention; the prefixed name wins when both are set.
    if let Some(v) = env.u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u16("LIVEHUB_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("LIVEHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("CORS_ALLOWED_ORIGINS") {
        let origins = parse_list(&v);
        if !origins.is_empty() {
            settings.server.cors_allowed_origins = origins;
        }
    }

    if let Some(v) = env.usize("LIVEHUB_MAILBOX_CAPACITY", 1, 1_000_000) {
        settings.hub.mailbox_capacity = v;
    }

    if let Some(v) = env.usize("LIVEHUB_MAX_MESSAGE_SIZE", 1, 16 * 1024 * 1024) {
        settings.connection.max_message_size = v;
    }
    if let Some(v) = env.u64("LIVEHUB_READ_DEADLINE_MS", 100, 3_600_000) {
        settings.connection.read_deadline_ms = v;
    }
    if let Some(v) = env.u64("LIVEHUB_PING_INTERVAL_MS", 100, 3_600_000) {
        settings.connection.ping_interval_ms = v;
    }
    if let Some(v) = env.u64("LIVEHUB_WRITE_TIMEOUT_MS", 100, 600_000) {
        settings.connection.write_timeout_ms = v;
    }

    if let Some(v) = env.string("LIVEHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("LIVEHUB_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(error) => warn!(key = "LIVEHUB_LOG_FORMAT", %error, "invalid env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, |v| parse_usize_range(v, min, max))
    }
}
