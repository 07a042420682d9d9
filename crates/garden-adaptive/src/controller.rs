//! Complexity control loop.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use garden_core::performance::PerformanceReading;
use garden_core::{ComplexityLevel, DeviceCapabilities, StateStore};
use garden_settings::AdaptiveSettings;
use garden_telemetry::{names, MetricsRecorder};

/// What a control tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlDecision {
    Decreased(ComplexityLevel),
    Increased(ComplexityLevel),
    /// Signal inside the comfort band, or already at a bound.
    Hold,
    /// A manual override is in effect.
    Pinned,
    /// Less than one control interval since the last decision.
    Throttled,
    Disabled,
}

pub struct ComplexityController {
    store: Arc<StateStore>,
    settings: AdaptiveSettings,
    last_decision_ms: Option<f64>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ComplexityController {
    /// Seeds the store's level from `caps`. This is the only seeding.
    pub fn new(
        store: Arc<StateStore>,
        settings: AdaptiveSettings,
        caps: DeviceCapabilities,
    ) -> Self {
        let initial = caps.initial_complexity();
        let _ = store.adjust_complexity_level(initial);
        info!(level = %initial, ?caps, "complexity seeded from device capabilities");
        Self {
            store,
            settings,
            last_decision_ms: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        metrics.gauge_set(
            names::COMPLEXITY_LEVEL,
            &[],
            f64::from(self.store.complexity_level().get()),
        );
        self.metrics = Some(metrics);
        self
    }

    /// The control rule, without throttling or side effects.
    pub fn evaluate(&self, current: ComplexityLevel, reading: &PerformanceReading) -> ComplexityLevel {
        let sample = &reading.sample;
        if reading.optimizing || sample.fps < self.settings.low_fps {
            current.step_down()
        } else if sample.fps > self.settings.high_fps
            && sample.render_time_ms < self.settings.render_budget_ms
        {
            current.step_up()
        } else {
            current
        }
    }

    pub fn tick(&mut self, reading: &PerformanceReading) -> ControlDecision {
        if !self.settings.enabled {
            return ControlDecision::Disabled;
        }
        let now_ms = reading.sample.timestamp_ms;
        if let Some(last) = self.last_decision_ms {
            if now_ms - last < self.settings.control_interval_ms as f64 {
                return ControlDecision::Throttled;
            }
        }
        self.last_decision_ms = Some(now_ms);

        let current = self.store.complexity_level();
        let next = self.evaluate(current, reading);
        if next == current {
            return if self.store.manual_override().is_some() {
                ControlDecision::Pinned
            } else {
                ControlDecision::Hold
            };
        }

        match self.store.adjust_complexity_level(next) {
            None => {
                debug!(wanted = %next, "manual complexity override in effect");
                ControlDecision::Pinned
            }
            Some(_) => {
                info!(
                    from = %current,
                    to = %next,
                    fps = reading.sample.fps,
                    render_ms = reading.sample.render_time_ms,
                    optimizing = reading.optimizing,
                    "complexity adjusted"
                );
                if let Some(metrics) = &self.metrics {
                    let direction = if next < current { "down" } else { "up" };
                    metrics.counter_inc(names::COMPLEXITY_CHANGES, &[("direction", direction)], 1);
                    metrics.gauge_set(names::COMPLEXITY_LEVEL, &[], f64::from(next.get()));
                }
                if next < current {
                    ControlDecision::Decreased(next)
                } else {
                    ControlDecision::Increased(next)
                }
            }
        }
    }

    /// Tick on every reading until the stream ends or `cancel` fires.
    pub async fn run<S>(mut self, readings: S, cancel: CancellationToken)
    where
        S: Stream<Item = PerformanceReading>,
    {
        let mut readings = std::pin::pin!(readings);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                reading = readings.next() => match reading {
                    Some(reading) => {
                        let _ = self.tick(&reading);
                    }
                    None => break,
                },
            }
        }
        debug!(level = %self.store.complexity_level(), "complexity controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use garden_core::ids::SessionId;
    use garden_core::performance::PerformanceSample;

    use super::*;

    fn reading(timestamp_ms: f64, fps: f64, render_time_ms: f64) -> PerformanceReading {
        PerformanceReading {
            sample: PerformanceSample {
                timestamp_ms,
                fps,
                render_time_ms,
            },
            optimizing: false,
        }
    }

    fn controller(caps: DeviceCapabilities) -> (ComplexityController, Arc<StateStore>) {
        let store = Arc::new(StateStore::new(SessionId::new()));
        let controller =
            ComplexityController::new(Arc::clone(&store), AdaptiveSettings::default(), caps);
        (controller, store)
    }

    fn top_tier() -> DeviceCapabilities {
        DeviceCapabilities {
            supports_tier2_graphics: true,
            supports_tier1_graphics: true,
            is_high_performance: true,
        }
    }

    #[test]
    fn seeds_from_capabilities() {
        let (_, store) = controller(top_tier());
        assert_eq!(store.complexity_level().get(), 4);
        let (_, store) = controller(DeviceCapabilities::default());
        assert_eq!(store.complexity_level().get(), 1);
    }

    #[test]
    fn comfort_band_holds() {
        let (mut c, store) = controller(top_tier());
        assert_eq!(c.tick(&reading(0.0, 45.0, 10.0)), ControlDecision::Hold);
        assert_eq!(store.complexity_level().get(), 4);
    }

    #[test]
    fn high_fps_over_budget_holds() {
        let caps = DeviceCapabilities {
            supports_tier1_graphics: true,
            ..Default::default()
        };
        let (mut c, _) = controller(caps);
        assert_eq!(c.tick(&reading(0.0, 60.0, 20.0)), ControlDecision::Hold);
    }

    #[test]
    fn optimizing_flag_steps_down_even_at_decent_fps() {
        let (mut c, _) = controller(top_tier());
        let mut r = reading(0.0, 45.0, 10.0);
        r.optimizing = true;
        assert_eq!(
            c.tick(&r),
            ControlDecision::Decreased(ComplexityLevel::new(3).unwrap())
        );
    }

    #[test]
    fn decisions_are_throttled_by_sample_time() {
        let (mut c, _) = controller(top_tier());
        assert!(matches!(c.tick(&reading(0.0, 20.0, 5.0)), ControlDecision::Decreased(_)));
        assert_eq!(c.tick(&reading(500.0, 20.0, 5.0)), ControlDecision::Throttled);
        assert_eq!(c.tick(&reading(999.0, 20.0, 5.0)), ControlDecision::Throttled);
        assert!(matches!(c.tick(&reading(1000.0, 20.0, 5.0)), ControlDecision::Decreased(_)));
    }

    #[test]
    fn disabled_controller_never_writes() {
        let store = Arc::new(StateStore::new(SessionId::new()));
        let settings = AdaptiveSettings {
            enabled: false,
            ..Default::default()
        };
        let mut c = ComplexityController::new(Arc::clone(&store), settings, top_tier());
        assert_eq!(c.tick(&reading(0.0, 5.0, 50.0)), ControlDecision::Disabled);
        assert_eq!(store.complexity_level().get(), 4);
    }

    #[test]
    fn changes_are_counted() {
        let metrics = Arc::new(MetricsRecorder::new());
        let (c, _) = controller(top_tier());
        let mut c = c.with_metrics(Arc::clone(&metrics));
        assert_eq!(metrics.gauge_get(names::COMPLEXITY_LEVEL, &[]), 4.0);
        c.tick(&reading(0.0, 10.0, 5.0));
        assert_eq!(
            metrics.counter_get(names::COMPLEXITY_CHANGES, &[("direction", "down")]),
            1
        );
        assert_eq!(metrics.gauge_get(names::COMPLEXITY_LEVEL, &[]), 3.0);
    }
}
