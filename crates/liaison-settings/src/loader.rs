//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LiaisonSettings::default()`]
//! 2. If `~/.liaison/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LIAISON_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LiaisonSettings;

/// Resolve the path to the settings file (`~/.liaison/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".liaison").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LiaisonSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<LiaisonSettings> {
    let defaults = serde_json::to_value(LiaisonSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LiaisonSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
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
/// Invalid values are silently ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut LiaisonSettings) {
    // ── Provider ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("LIAISON_DEFAULT_MODEL") {
        settings.provider.default_model = v;
    }
    if let Some(v) = read_env_string("LIAISON_OPENAI_BASE_URL") {
        settings.provider.openai_base_url = v;
    }
    if let Some(v) = read_env_string("LIAISON_QWEN_BASE_URL") {
        settings.provider.qwen_base_url = v;
    }
    if let Some(v) = read_env_string("LIAISON_API_KEY_ENV") {
        settings.provider.api_key_env = v;
    }
    if let Some(v) = read_env_u64("LIAISON_REQUEST_TIMEOUT_MS", 1000, 600_000) {
        settings.provider.request_timeout_ms = v;
    }

    // ── Workflow ───────────────────────────────────────────────────
    if let Some(v) = read_env_u32("LIAISON_MAX_STAGE_ATTEMPTS", 1, 10) {
        settings.workflow.max_stage_attempts = v;
    }
    if let Some(v) = read_env_u64("LIAISON_RETRY_BASE_DELAY_MS", 10, 60_000) {
        settings.workflow.retry_base_delay_ms = v;
    }

    // ── Stream ─────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("LIAISON_BACKLOG_CAPACITY", 16, 1_000_000) {
        settings.stream.backlog_capacity = v;
    }
    if let Some(v) = read_env_usize("LIAISON_SUBSCRIBER_BUFFER", 1, 100_000) {
        settings.stream.subscriber_buffer = v;
    }

    // ── Storage ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LIAISON_CHECKPOINT_DB") {
        settings.storage.checkpoint_db_path = v;
    }
    if let Some(v) = read_env_string("LIAISON_HISTORY_DB") {
        settings.storage.history_db_path = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    parse_bounded_u32(&std::env::var(name).ok()?, min, max)
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    parse_bounded_u64(&std::env::var(name).ok()?, min, max)
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    parse_bounded_usize(&std::env::var(name).ok()?, min, max)
}

fn parse_bounded_u32(raw: &str, min: u32, max: u32) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|v| (min..=max).contains(v))
}

fn parse_bounded_u64(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|v| (min..=max).contains(v))
}

fn parse_bounded_usize(raw: &str, min: usize, max: usize) -> Option<usize> {
    raw.parse::<usize>().ok().filter(|v| (min..=max).contains(v))
}
