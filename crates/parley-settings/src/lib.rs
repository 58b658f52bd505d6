//! # parley-settings
//!
//! Layered configuration for the Parley hub and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **Settings file**: `~/.parley/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ParleySettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from the default path with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static ParleySettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ParleySettings) -> std::result::Result<(), ParleySettings> {
    SETTINGS.set(settings)
}
