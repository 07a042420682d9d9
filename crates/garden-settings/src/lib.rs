//! # garden-settings
//!
//! Layered configuration for the garden realtime core.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GardenSettings::default()`]
//! 2. **User file**: `~/.garden/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GARDEN_*` overrides (highest priority)
//!
//! There is no global instance. The binary loads settings once and hands
//! the relevant sections to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
