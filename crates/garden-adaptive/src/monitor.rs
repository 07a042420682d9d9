//! Frame timing to smoothed performance readings.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{future, Stream, StreamExt};
use tracing::{debug, info};

use garden_core::performance::{FrameTick, PerformanceReading, PerformanceSample};
use garden_settings::AdaptiveSettings;
use garden_telemetry::{names, MetricsRecorder};

/// Moving average over the last N frame intervals and render times.
///
/// Smoothed fps is `1000 / mean(interval)`, so one very short frame only
/// nudges the reading instead of dominating the window. The first tick
/// only establishes a reference time. Ticks whose timestamp
/// does not advance produce no sample.
pub struct PerformanceMonitor {
    window: usize,
    low_fps: f64,
    optimize_after: u32,
    previous_ms: Option<f64>,
    intervals: VecDeque<f64>,
    render: VecDeque<f64>,
    low_streak: u32,
    optimizing: bool,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl PerformanceMonitor {
    pub fn new(settings: &AdaptiveSettings) -> Self {
        let window = settings.smoothing_window.max(1);
        Self {
            window,
            low_fps: settings.low_fps,
            optimize_after: settings.optimize_after_frames,
            previous_ms: None,
            intervals: VecDeque::with_capacity(window),
            render: VecDeque::with_capacity(window),
            low_streak: 0,
            optimizing: false,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Smoothed frames per second, `0.0` before the first sample.
    pub fn fps(&self) -> f64 {
        let interval = mean(&self.intervals);
        if interval > 0.0 {
            1000.0 / interval
        } else {
            0.0
        }
    }

    /// Smoothed render time in milliseconds.
    pub fn render_time_ms(&self) -> f64 {
        mean(&self.render)
    }

    pub fn is_optimizing(&self) -> bool {
        self.optimizing
    }

    pub fn record(&mut self, tick: FrameTick) -> Option<PerformanceReading> {
        if !tick.timestamp_ms.is_finite() {
            return None;
        }
        let previous = self.previous_ms.replace(tick.timestamp_ms)?;
        let delta = tick.timestamp_ms - previous;
        if delta <= 0.0 {
            return None;
        }

        push_bounded(&mut self.intervals, delta, self.window);
        push_bounded(&mut self.render, tick.render_time_ms.max(0.0), self.window);

        let sample = PerformanceSample {
            timestamp_ms: tick.timestamp_ms,
            fps: self.fps(),
            render_time_ms: self.render_time_ms(),
        };
        self.update_optimizing(sample.fps);

        if let Some(metrics) = &self.metrics {
            metrics.gauge_set(names::FPS, &[], sample.fps);
            metrics.histogram_observe(names::RENDER_TIME_MS, &[], tick.render_time_ms);
        }

        Some(PerformanceReading {
            sample,
            optimizing: self.optimizing,
        })
    }

    /// Consume the monitor and turn a tick stream into readings.
    pub fn into_stream<S>(self, ticks: S) -> impl Stream<Item = PerformanceReading>
    where
        S: Stream<Item = FrameTick>,
    {
        ticks
            .scan(self, |monitor, tick| future::ready(Some(monitor.record(tick))))
            .filter_map(future::ready)
    }

    fn update_optimizing(&mut self, smoothed_fps: f64) {
        if smoothed_fps < self.low_fps {
            self.low_streak = self.low_streak.saturating_add(1);
            if !self.optimizing && self.low_streak >= self.optimize_after {
                self.optimizing = true;
                info!(fps = smoothed_fps, frames = self.low_streak, "sustained low frame rate, optimizing");
            }
        } else {
            self.low_streak = 0;
            if self.optimizing {
                self.optimizing = false;
                debug!(fps = smoothed_fps, "frame rate recovered");
            }
        }
    }
}

fn push_bounded(window: &mut VecDeque<f64>, value: f64, cap: usize) {
    if window.len() == cap {
        let _ = window.pop_front();
    }
    window.push_back(value);
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
