//! Settings sections.

use std::collections::BTreeMap;
use std::time::Duration;

use garden_core::DeviceCapabilities;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GardenSettings {
    pub realtime: RealtimeSettings,
    pub adaptive: AdaptiveSettings,
    pub telemetry: TelemetrySettings,
    pub device: DeviceSettings,
}

impl GardenSettings {
    /// Reject combinations that would break the backoff or control loops.
    pub fn validate(&self) -> Result<()> {
        let rt = &self.realtime;
        if !rt.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "realtime.path must start with '/', got {:?}",
                rt.path
            )));
        }
        if rt.base_delay_ms == 0 || rt.max_delay_ms < rt.base_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "realtime backoff needs 0 < baseDelayMs <= maxDelayMs, got {} / {}",
                rt.base_delay_ms, rt.max_delay_ms
            )));
        }
        if rt.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "realtime.heartbeatIntervalMs must be positive".into(),
            ));
        }
        let ad = &self.adaptive;
        if ad.smoothing_window == 0 {
            return Err(SettingsError::InvalidValue(
                "adaptive.smoothingWindow must be positive".into(),
            ));
        }
        if ad.low_fps >= ad.high_fps {
            return Err(SettingsError::InvalidValue(format!(
                "adaptive.lowFps ({}) must be below adaptive.highFps ({})",
                ad.low_fps, ad.high_fps
            )));
        }
        Ok(())
    }
}

/// Connection, heartbeat and reconnect settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Well-known path appended to the page origin.
    pub path: String,
    pub heartbeat_interval_ms: u64,
    /// First backoff delay; doubles per attempt.
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Capacity of the command channel into the connection task.
    pub command_queue_size: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            heartbeat_interval_ms: 30_000,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            command_queue_size: 64,
        }
    }
}

impl RealtimeSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Frame-timing smoothing and complexity control thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveSettings {
    /// When false the level stays at its seeded value.
    pub enabled: bool,
    /// Moving-average window, in frames.
    pub smoothing_window: usize,
    /// Minimum sample time between two control decisions.
    pub control_interval_ms: u64,
    /// Below this smoothed fps the level steps down.
    pub low_fps: f64,
    /// Above this smoothed fps (and within the render budget) the level steps up.
    pub high_fps: f64,
    pub render_budget_ms: f64,
    /// Consecutive low readings before the monitor reports "optimizing".
    pub optimize_after_frames: u32,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            smoothing_window: 60,
            control_interval_ms: 1_000,
            low_fps: 30.0,
            high_fps: 55.0,
            render_budget_ms: 16.0,
            optimize_after_frames: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `garden_realtime => debug`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Skip probing and use these capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<DeviceCapabilities>,
}
