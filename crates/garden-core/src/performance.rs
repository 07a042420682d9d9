use serde::{Deserialize, Serialize};

/// One animation-frame callback as reported by the render loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameTick {
    /// Frame start time in milliseconds on a monotonic clock.
    pub timestamp_ms: f64,
    /// Time spent rendering this frame.
    pub render_time_ms: f64,
}

impl FrameTick {
    pub fn new(timestamp_ms: f64, render_time_ms: f64) -> Self {
        Self {
            timestamp_ms,
            render_time_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub timestamp_ms: f64,
    pub fps: f64,
    pub render_time_ms: f64,
}

/// A smoothed sample plus the monitor's sustained-degradation flag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerformanceReading {
    pub sample: PerformanceSample,
    pub optimizing: bool,
}
