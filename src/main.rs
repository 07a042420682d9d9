use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use garden_adaptive::{ComplexityController, DeviceCapabilityProbe, HostProbe, PerformanceMonitor};
use garden_core::ids::SessionId;
use garden_core::performance::FrameTick;
use garden_core::{StateStore, StoreEvent};
use garden_realtime::{ConnectionManager, WsTransport};
use garden_settings::{load_settings, load_settings_from_path};
use garden_telemetry::{init_telemetry, names, TelemetryConfig};

/// Realtime sync and adaptive complexity core for the garden portfolio.
#[derive(Parser, Debug)]
#[command(name = "garden", version)]
struct Args {
    /// Page origin the WebSocket endpoint is derived from.
    #[arg(long, default_value = "http://localhost:3000")]
    origin: String,

    /// Settings file (defaults to ~/.garden/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Frame rate of the simulated render loop, up to 1000.
    #[arg(long, default_value_t = 60.0, value_parser = parse_simulated_fps)]
    simulated_fps: f64,

    /// Log JSON lines instead of human-readable output.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(TelemetryConfig::from_parts(
        &settings.telemetry.log_level,
        &settings.telemetry.module_levels,
        args.json_logs || settings.telemetry.json,
    ));
    let metrics = telemetry.metrics();

    let store = Arc::new(StateStore::new(SessionId::new()));
    info!(session = %store.session_id(), origin = %args.origin, "starting garden core");

    let caps = HostProbe::from_settings(&settings.device).probe();
    let controller = ComplexityController::new(Arc::clone(&store), settings.adaptive.clone(), caps)
        .with_metrics(Arc::clone(&metrics));

    let connection = ConnectionManager::for_origin(
        &args.origin,
        &settings.realtime,
        Arc::new(WsTransport),
        Arc::clone(&store),
    )?
    .with_metrics(Arc::clone(&metrics))
    .spawn();
    connection.connect().await;

    let cancel = CancellationToken::new();
    let readings = PerformanceMonitor::new(&settings.adaptive)
        .with_metrics(Arc::clone(&metrics))
        .into_stream(simulated_frames(args.simulated_fps));
    let control = tokio::spawn(controller.run(readings, cancel.clone()));
    let events = tokio::spawn(log_store_events(store.subscribe(), cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    cancel.cancel();
    connection.shutdown().await;
    let _ = control.await;
    let _ = events.await;

    let render = metrics.histogram_summary(names::RENDER_TIME_MS, &[]);
    info!(
        level = %store.complexity_level(),
        frames = render.count,
        render_p95_ms = render.p95,
        connect_attempts = metrics.counter_get(names::CONNECT_ATTEMPTS, &[]),
        "stopped"
    );
    Ok(())
}

/// Keeps the simulated frame period at a millisecond or more.
const MAX_SIMULATED_FPS: f64 = 1000.0;

fn parse_simulated_fps(raw: &str) -> Result<f64, String> {
    let fps: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if fps.is_finite() && fps > 0.0 && fps <= MAX_SIMULATED_FPS {
        Ok(fps)
    } else {
        Err(format!("must be in (0, {MAX_SIMULATED_FPS}]"))
    }
}

/// Stand-in for the browser's animation-frame callback.
fn simulated_frames(fps: f64) -> impl Stream<Item = FrameTick> {
    let frame = Duration::from_secs_f64(1.0 / fps);
    let render_ms = frame.as_secs_f64() * 1000.0 * 0.5;
    let origin = tokio::time::Instant::now();
    IntervalStream::new(tokio::time::interval(frame))
        .map(move |at| FrameTick::new((at - origin).as_secs_f64() * 1000.0, render_ms))
}

async fn log_store_events(mut events: broadcast::Receiver<StoreEvent>, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(StoreEvent::WeatherChanged(weather)) => {
                info!(condition = ?weather.condition, intensity = weather.intensity, "weather changed");
            }
            Ok(StoreEvent::RealtimeChanged(data)) => {
                info!(
                    visitors = data.active_visitors,
                    interactions = data.recent_interactions.len(),
                    projects = data.project_growth.len(),
                    "realtime data changed"
                );
            }
            Ok(StoreEvent::ComplexityChanged { level, manual }) => {
                info!(%level, manual, "complexity changed");
            }
            Ok(StoreEvent::Notification(notice)) => {
                info!(kind = ?notice.kind, title = %notice.title, message = %notice.message, "notice");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "store event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_fps_defaults_to_sixty() {
        let args = Args::try_parse_from(["garden"]).unwrap();
        assert_eq!(args.simulated_fps, 60.0);
    }

    #[test]
    fn simulated_fps_is_bounded() {
        for ok in ["0.5", "60", "1000"] {
            assert!(Args::try_parse_from(["garden", "--simulated-fps", ok]).is_ok(), "{ok}");
        }
        for bad in ["0", "-30", "NaN", "inf", "1e10", "1000.5", "fast"] {
            assert!(Args::try_parse_from(["garden", "--simulated-fps", bad]).is_err(), "{bad}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_simulated_frames_advance() {
        let ticks: Vec<_> = simulated_frames(MAX_SIMULATED_FPS).take(3).collect().await;
        assert_eq!(ticks.len(), 3);
        assert!(ticks[1].timestamp_ms > ticks[0].timestamp_ms);
    }
}
