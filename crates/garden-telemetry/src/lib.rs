mod metrics;

pub use metrics::{HistogramSummary, MetricsRecorder, DEFAULT_HISTOGRAM_CAPACITY};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Metric names shared by the realtime and adaptive crates.
pub mod names {
    pub const CONNECT_ATTEMPTS: &str = "realtime.connect.attempts";
    pub const CONNECT_FAILURES: &str = "realtime.connect.failures";
    pub const RECONNECTS_SCHEDULED: &str = "realtime.reconnect.scheduled";
    pub const CONNECTION_OPEN: &str = "realtime.connection.open";
    pub const FRAMES_RECEIVED: &str = "realtime.frames.received";
    pub const FRAMES_ROUTED: &str = "realtime.frames.routed";
    pub const FRAMES_DROPPED: &str = "realtime.frames.dropped";
    pub const MESSAGES_SENT: &str = "realtime.messages.sent";
    pub const MESSAGES_DISCARDED: &str = "realtime.messages.discarded";
    pub const FPS: &str = "adaptive.fps";
    pub const RENDER_TIME_MS: &str = "adaptive.render_time_ms";
    pub const COMPLEXITY_LEVEL: &str = "adaptive.complexity_level";
    pub const COMPLEXITY_CHANGES: &str = "adaptive.complexity.changes";
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "garden_realtime" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from loosely-typed settings values. Unparseable levels are skipped.
    pub fn from_parts<'a>(
        log_level: &str,
        module_levels: impl IntoIterator<Item = (&'a String, &'a String)>,
        json: bool,
    ) -> Self {
        Self {
            log_level: log_level.parse().unwrap_or(Level::INFO),
            module_levels: module_levels
                .into_iter()
                .filter_map(|(module, level)| Some((module.clone(), level.parse().ok()?)))
                .collect(),
            json,
        }
    }

    fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Keeps the metrics recorder alive for the lifetime of the process.
pub struct TelemetryGuard {
    metrics: Arc<MetricsRecorder>,
}

impl TelemetryGuard {
    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("garden-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        metrics: Arc::new(recorder()),
    }
}

/// Ten seconds of render times at 60 fps.
const RENDER_TIME_WINDOW: usize = 600;

fn recorder() -> MetricsRecorder {
    MetricsRecorder::new().with_histogram_capacity(names::RENDER_TIME_MS, RENDER_TIME_WINDOW)
}
