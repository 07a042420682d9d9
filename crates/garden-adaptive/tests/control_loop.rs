//! End-to-end control loop: frame ticks through the monitor into the
//! controller and out to the store.

use std::sync::Arc;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use garden_adaptive::{
    ComplexityController, ControlDecision, DeviceCapabilityProbe, PerformanceMonitor, StaticProbe,
};
use garden_core::ids::SessionId;
use garden_core::performance::{FrameTick, PerformanceReading, PerformanceSample};
use garden_core::{ComplexityLevel, DeviceCapabilities, StateStore, StoreEvent};
use garden_settings::AdaptiveSettings;

fn caps(tier2: bool, tier1: bool, high: bool) -> DeviceCapabilities {
    DeviceCapabilities {
        supports_tier2_graphics: tier2,
        supports_tier1_graphics: tier1,
        is_high_performance: high,
    }
}

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

fn setup(caps: DeviceCapabilities) -> (ComplexityController, Arc<StateStore>) {
    let store = Arc::new(StateStore::new(SessionId::new()));
    let probe = StaticProbe(caps);
    let controller =
        ComplexityController::new(Arc::clone(&store), AdaptiveSettings::default(), probe.probe());
    (controller, store)
}

/// `count` ticks at a steady frame interval, starting at `start_ms`.
fn steady_ticks(start_ms: f64, frame_ms: f64, render_ms: f64, count: usize) -> Vec<FrameTick> {
    (0..count)
        .map(|i| FrameTick::new(start_ms + frame_ms * i as f64, render_ms))
        .collect()
}

#[test]
fn seeding_covers_every_tier() {
    let cases = [
        (caps(true, true, true), 4),
        (caps(true, true, false), 3),
        (caps(true, false, false), 3),
        (caps(false, true, true), 2),
        (caps(false, true, false), 2),
        (caps(false, false, true), 1),
        (caps(false, false, false), 1),
    ];
    for (caps, expected) in cases {
        let (_, store) = setup(caps);
        assert_eq!(store.complexity_level().get(), expected, "{caps:?}");
    }
}

#[test]
fn low_fps_steps_down_one_per_tick_to_floor() {
    let (mut controller, store) = setup(caps(true, true, true));
    let mut levels = Vec::new();
    for (i, fps) in [20.0, 22.0, 21.0, 25.0].into_iter().enumerate() {
        controller.tick(&reading(i as f64 * 1000.0, fps, 10.0));
        levels.push(store.complexity_level().get());
    }
    assert_eq!(levels, vec![3, 2, 1, 1]);

    assert_eq!(
        controller.tick(&reading(4000.0, 10.0, 10.0)),
        ControlDecision::Hold
    );
    assert_eq!(store.complexity_level(), ComplexityLevel::MIN);
}

#[test]
fn sustained_high_fps_climbs_to_ceiling_and_stops() {
    let (mut controller, store) = setup(caps(false, true, false));
    assert_eq!(store.complexity_level().get(), 2);

    let decisions: Vec<_> = (0..5)
        .map(|i| controller.tick(&reading(i as f64 * 1000.0, 60.0, 8.0)))
        .collect();
    assert_eq!(
        decisions,
        vec![
            ControlDecision::Increased(ComplexityLevel::new(3).unwrap()),
            ControlDecision::Increased(ComplexityLevel::MAX),
            ControlDecision::Hold,
            ControlDecision::Hold,
            ControlDecision::Hold,
        ]
    );
    assert_eq!(store.complexity_level(), ComplexityLevel::MAX);
}

#[test]
fn manual_override_pins_until_cleared() {
    let (mut controller, store) = setup(caps(true, true, true));
    let two = ComplexityLevel::new(2).unwrap();
    store.set_manual_complexity(two);

    for i in 0..3 {
        assert_eq!(
            controller.tick(&reading(i as f64 * 1000.0, 10.0, 40.0)),
            ControlDecision::Pinned
        );
    }
    assert_eq!(store.complexity_level(), two);

    store.clear_manual_override();
    assert_eq!(
        controller.tick(&reading(3000.0, 10.0, 40.0)),
        ControlDecision::Decreased(ComplexityLevel::MIN)
    );
}

#[tokio::test]
async fn slow_frames_drive_level_down_through_the_monitor() {
    let (controller, store) = setup(caps(true, true, true));
    let mut events = store.subscribe();

    // 50 ms frames = 20 fps for five seconds of sample time.
    let ticks = steady_ticks(0.0, 50.0, 30.0, 101);
    let readings = PerformanceMonitor::new(&AdaptiveSettings::default())
        .into_stream(tokio_stream::iter(ticks));
    controller.run(readings, CancellationToken::new()).await;

    assert_eq!(store.complexity_level(), ComplexityLevel::MIN);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::ComplexityChanged { level, manual } = event {
            assert!(!manual);
            seen.push(level.get());
        }
    }
    assert_eq!(seen, vec![3, 2, 1]);
}

#[tokio::test]
async fn fast_frames_drive_level_up_through_the_monitor() {
    let (controller, store) = setup(caps(true, false, false));
    assert_eq!(store.complexity_level().get(), 3);

    // 10 ms frames = 100 fps with a 5 ms render time.
    let ticks = steady_ticks(0.0, 10.0, 5.0, 500);
    let readings = PerformanceMonitor::new(&AdaptiveSettings::default())
        .into_stream(tokio_stream::iter(ticks));
    controller.run(readings, CancellationToken::new()).await;

    assert_eq!(store.complexity_level(), ComplexityLevel::MAX);
}

#[tokio::test]
async fn one_short_frame_never_raises_the_level() {
    let (controller, store) = setup(caps(false, true, false));
    let seeded = store.complexity_level().get();
    let mut events = store.subscribe();

    // Steady 20 fps, one frame 0.1 ms after its predecessor, then 20 fps again.
    let mut ticks = steady_ticks(0.0, 50.0, 30.0, 201);
    let spike_ms = 200.0 * 50.0 + 0.1;
    ticks.push(FrameTick::new(spike_ms, 30.0));
    ticks.extend(steady_ticks(spike_ms + 50.0, 50.0, 30.0, 200));

    let readings = PerformanceMonitor::new(&AdaptiveSettings::default())
        .into_stream(tokio_stream::iter(ticks));
    controller.run(readings, CancellationToken::new()).await;

    let mut previous = seeded;
    while let Ok(event) = events.try_recv() {
        if let StoreEvent::ComplexityChanged { level, .. } = event {
            assert!(level.get() <= previous, "level rose from {previous} to {level}");
            previous = level.get();
        }
    }
    assert_eq!(store.complexity_level(), ComplexityLevel::MIN);
}

#[tokio::test]
async fn cancelled_run_stops_before_reading() {
    let (controller, store) = setup(caps(true, true, true));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let readings = tokio_stream::iter(vec![reading(0.0, 5.0, 50.0)]);
    // Already-cancelled token races the first reading; either way the
    // loop must terminate.
    controller.run(readings, cancel).await;
    assert!(store.complexity_level().get() >= 3);
}

#[tokio::test]
async fn run_ends_with_pending_stream_when_cancelled() {
    let (controller, store) = setup(caps(true, true, true));
    let cancel = CancellationToken::new();
    let task = tokio::spawn(controller.run(futures::stream::pending(), cancel.clone()));
    cancel.cancel();
    task.await.unwrap();
    assert_eq!(store.complexity_level().get(), 4);
}

proptest! {
    #[test]
    fn level_stays_in_bounds(
        start in 0usize..4,
        samples in prop::collection::vec((0.0f64..200.0, 0.0f64..60.0, any::<bool>()), 1..80),
    ) {
        let seeds = [
            caps(false, false, false),
            caps(false, true, false),
            caps(true, true, false),
            caps(true, true, true),
        ];
        let (mut controller, store) = setup(seeds[start]);
        let mut previous = store.complexity_level().get();
        for (i, (fps, render, optimizing)) in samples.into_iter().enumerate() {
            let mut r = reading(i as f64 * 1000.0, fps, render);
            r.optimizing = optimizing;
            controller.tick(&r);
            let level = store.complexity_level().get();
            prop_assert!((1..=4).contains(&level));
            prop_assert!(level.abs_diff(previous) <= 1);
            previous = level;
        }
    }
}
