//! # liaison-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LiaisonSettings::default()`]
//! 2. **User file**: `~/.liaison/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIAISON_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, initialized on first access.
static SETTINGS: OnceLock<LiaisonSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.liaison/settings.json` with env
/// var overrides; if loading fails, falls back to compiled defaults.
pub fn get_settings() -> &'static LiaisonSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value (tests, embedders).
///
/// Returns `false` if settings were already initialized.
pub fn init_settings(settings: LiaisonSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}
