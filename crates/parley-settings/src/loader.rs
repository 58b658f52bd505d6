//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `PARLEY_*` environment variable overrides
//! 4. Validate cross-field constraints

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ParleySettings;

/// Resolve the path to the settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    load_with_env(path, &|name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: &dyn Fn(&str) -> Option<String>) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ParleySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
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

/// Apply process environment overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut ParleySettings, env: &dyn Fn(&str) -> Option<String>) {
    let vars = EnvVars(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = vars.string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = vars.number("PARLEY_PORT", 0..=65535) {
        settings.server.port = v;
    }
    if let Some(v) = vars.number("PARLEY_MAX_CONNECTIONS", 1..=1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = vars.number("PARLEY_HEARTBEAT_INTERVAL_MS", 100..=600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = vars.number("PARLEY_MAX_MESSAGE_SIZE", 1024..=16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = vars.number("PARLEY_SEND_QUEUE_CAPACITY", 1..=65_536) {
        settings.server.send_queue_capacity = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = vars.string("PARLEY_URL") {
        settings.client.url = v;
    }
    if let Some(v) = vars.number("PARLEY_KEEPALIVE_INTERVAL_MS", 100..=600_000) {
        settings.client.keepalive_interval_ms = v;
    }
    if let Some(v) = vars.number("PARLEY_RECONNECT_BASE_DELAY_MS", 10..=600_000) {
        settings.client.reconnect_base_delay_ms = v;
    }
    if let Some(v) = vars.number("PARLEY_RECONNECT_MAX_DELAY_MS", 10..=3_600_000) {
        settings.client.reconnect_max_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = vars.string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = vars.bool("PARLEY_LOG_JSON") {
        settings.logging.json = v;
    }
}

impl ParleySettings {
    /// Check constraints that span fields or that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::invalid(
                "server.sendQueueCapacity",
                "must be at least 1",
            ));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::invalid(
                "server.maxConnections",
                "must be at least 1",
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "server.heartbeatIntervalMs",
                "must be positive",
            ));
        }
        if self.client.keepalive_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "client.keepaliveIntervalMs",
                "must be positive",
            ));
        }
        if self.client.reconnect_base_delay_ms == 0
            || self.client.reconnect_base_delay_ms > self.client.reconnect_max_delay_ms
        {
            return Err(SettingsError::invalid(
                "client.reconnectBaseDelayMs",
                format!(
                    "{} must be positive and not exceed client.reconnectMaxDelayMs ({})",
                    self.client.reconnect_base_delay_ms, self.client.reconnect_max_delay_ms
                ),
            ));
        }
        Ok(())
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

/// Parse a number and keep it only if it falls inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvVars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl EnvVars<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.0)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, parse_bool)
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd,
    {
        self.parsed(name, |v| parse_in_range(v, range))
    }
}
