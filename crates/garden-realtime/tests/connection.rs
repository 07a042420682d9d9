//! Connection driver tests against the scripted mock transport.
//!
//! All tests run on tokio's paused clock, so backoff and heartbeat timings
//! are observed exactly without real waiting.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use garden_core::ids::SessionId;
use garden_core::messages::OutboundMessage;
use garden_core::state::NoticeKind;
use garden_core::{ConnectionStatus, StateStore, StoreEvent};
use garden_realtime::mock::{MockConnect, MockPeer, MockTransport};
use garden_realtime::{ConnectionHandle, ConnectionManager};
use garden_settings::RealtimeSettings;
use garden_telemetry::{names, MetricsRecorder};

struct Harness {
    handle: ConnectionHandle,
    transport: Arc<MockTransport>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
    store: Arc<StateStore>,
    metrics: Arc<MetricsRecorder>,
}

fn harness(script: Vec<MockConnect>) -> Harness {
    let (transport, peers) = MockTransport::new(script);
    let store = Arc::new(StateStore::new(SessionId::from_raw("sess_test")));
    let metrics = Arc::new(MetricsRecorder::new());
    let handle = ConnectionManager::new(
        "ws://garden.test/ws",
        &RealtimeSettings::default(),
        transport.clone(),
        Arc::clone(&store),
    )
    .with_metrics(Arc::clone(&metrics))
    .spawn();
    Harness {
        handle,
        transport,
        peers,
        store,
        metrics,
    }
}

fn message_type(raw: &str) -> String {
    let value: Value = serde_json::from_str(raw).unwrap();
    value["type"].as_str().unwrap().to_string()
}

fn assert_gap(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(5),
        "expected ~{expected:?}, got {actual:?}"
    );
}

async fn open(h: &mut Harness) -> MockPeer {
    h.handle.connect().await;
    let mut peer = h.peers.recv().await.unwrap();
    let _ = h.handle.wait_for(|s| s.is_open()).await.unwrap();
    let hello = peer.next_sent().await.unwrap();
    assert_eq!(message_type(&hello), "visitor_joined");
    peer
}

#[tokio::test(start_paused = true)]
async fn stays_disconnected_until_connect() {
    let h = harness(vec![]);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.handle.state().status, ConnectionStatus::Disconnected);
    assert_eq!(h.transport.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn open_announces_visitor_and_notifies() {
    let mut h = harness(vec![]);
    h.handle.connect().await;
    let mut peer = h.peers.recv().await.unwrap();
    let state = h.handle.wait_for(|s| s.is_open()).await.unwrap();
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_error.is_none());

    let hello: Value = serde_json::from_str(&peer.next_sent().await.unwrap()).unwrap();
    assert_eq!(hello["type"], "visitor_joined");
    assert_eq!(hello["payload"]["sessionId"], "sess_test");
    assert!(hello["timestamp"].as_str().unwrap().ends_with('Z'));

    let notices = h.store.notifications();
    assert!(notices.iter().any(|n| n.kind == NoticeKind::Success));
    assert_eq!(h.metrics.gauge_get(names::CONNECTION_OPEN, &[]), 1.0);
}

#[tokio::test(start_paused = true)]
async fn connect_while_open_is_a_no_op() {
    let mut h = harness(vec![]);
    let _peer = open(&mut h).await;
    h.handle.connect().await;
    h.handle.connect().await;
    tokio::task::yield_now().await;
    assert_eq!(h.transport.connect_count(), 1);
    assert!(h.handle.state().is_open());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_every_interval_only_while_open() {
    let mut h = harness(vec![]);
    let start = Instant::now();
    let mut peer = open(&mut h).await;

    let first = peer.next_sent().await.unwrap();
    assert_eq!(message_type(&first), "heartbeat");
    assert_gap(Instant::now() - start, 30_000);

    let second = peer.next_sent().await.unwrap();
    assert_eq!(message_type(&second), "heartbeat");
    assert_gap(Instant::now() - start, 60_000);

    h.handle.disconnect().await;
    let state = h
        .handle
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .unwrap();
    assert!(!state.reconnect_pending);
    assert!(peer.is_closed());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(peer.drain_sent().is_empty());
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_then_degrades() {
    let h = harness(vec![
        MockConnect::refuse("refused"),
        MockConnect::refuse("refused"),
        MockConnect::refuse("refused"),
        MockConnect::refuse("refused"),
        MockConnect::refuse("refused"),
        MockConnect::refuse("refused"),
    ]);
    h.handle.connect().await;
    let state = h.handle.wait_for(|s| s.degraded).await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_eq!(state.reconnect_attempts, 5);
    assert!(!state.reconnect_pending);
    assert!(state.last_error.unwrap().contains("refused"));

    let times = h.transport.connect_times();
    assert_eq!(times.len(), 6);
    for (pair, expected) in times.windows(2).zip([1_000, 2_000, 4_000, 8_000, 16_000]) {
        assert_gap(pair[1] - pair[0], expected);
    }

    // No further attempts once degraded.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.transport.connect_count(), 6);

    let notices = h.store.notifications();
    assert!(notices
        .iter()
        .any(|n| n.kind == NoticeKind::Warning && !n.persistent));
    assert!(notices.iter().any(|n| n.kind == NoticeKind::Error && n.persistent));
    assert_eq!(h.metrics.counter_get(names::CONNECT_FAILURES, &[]), 6);
    assert_eq!(h.metrics.counter_get(names::RECONNECTS_SCHEDULED, &[]), 5);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_degraded_retries_again() {
    let mut script = vec![MockConnect::refuse("down"); 6];
    script.push(MockConnect::Accept);
    let mut h = harness(script);
    h.handle.connect().await;
    let _ = h.handle.wait_for(|s| s.degraded).await.unwrap();

    h.handle.connect().await;
    let _peer = h.peers.recv().await.unwrap();
    let state = h.handle.wait_for(|s| s.is_open()).await.unwrap();
    assert!(!state.degraded);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(h.transport.connect_count(), 7);
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_and_resets_backoff() {
    let mut h = harness(vec![]);
    let peer = open(&mut h).await;

    let lost_at = Instant::now();
    peer.push_close(false);
    let mut second = h.peers.recv().await.unwrap();
    assert_gap(Instant::now() - lost_at, 1_000);

    let state = h.handle.wait_for(|s| s.is_open()).await.unwrap();
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_error.is_none());
    assert_eq!(message_type(&second.next_sent().await.unwrap()), "visitor_joined");

    // A second outage starts from the base delay again.
    let lost_at = Instant::now();
    drop(second);
    let _third = h.peers.recv().await.unwrap();
    assert_gap(Instant::now() - lost_at, 1_000);
}

#[tokio::test(start_paused = true)]
async fn clean_server_close_does_not_reconnect() {
    let mut h = harness(vec![]);
    let peer = open(&mut h).await;
    peer.push_close(true);
    let state = h
        .handle
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .unwrap();
    assert!(!state.reconnect_pending);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_send_failure_counts_as_loss() {
    let mut h = harness(vec![]);
    let peer = open(&mut h).await;
    peer.fail_sends();

    let state = h.handle.wait_for(|s| s.reconnect_pending).await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.last_error.unwrap().contains("send failure"));

    let _next = h.peers.recv().await.unwrap();
    assert_eq!(h.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_cancels_reconnect() {
    let h = harness(vec![MockConnect::refuse("refused")]);
    h.handle.connect().await;
    let _ = h.handle.wait_for(|s| s.reconnect_pending).await.unwrap();

    h.handle.disconnect().await;
    let state = h.handle.wait_for(|s| !s.reconnect_pending).await.unwrap();
    assert_eq!(state.status, ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_handle_during_backoff_stops_everything() {
    let Harness {
        handle, transport, ..
    } = harness(vec![MockConnect::refuse("refused")]);
    handle.connect().await;
    let _ = handle.wait_for(|s| s.reconnect_pending).await.unwrap();

    drop(handle);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_handshake_abandons_it() {
    let mut h = harness(vec![MockConnect::delayed(
        Duration::from_secs(5),
        MockConnect::Accept,
    )]);
    h.handle.connect().await;
    let _ = h
        .handle
        .wait_for(|s| s.status == ConnectionStatus::Connecting)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    h.handle.disconnect().await;
    let _ = h
        .handle
        .wait_for(|s| s.status == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.peers.try_recv().is_err());
    assert_eq!(h.handle.state().status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_cleanly() {
    let mut h = harness(vec![]);
    let peer = open(&mut h).await;
    let mut status = h.handle.subscribe();
    h.handle.shutdown().await;
    assert!(peer.is_closed());
    assert_eq!(status.borrow_and_update().status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_keep_connection_open_and_order_is_preserved() {
    let mut h = harness(vec![]);
    let peer = open(&mut h).await;
    let mut events = h.store.subscribe();

    peer.push_text("{not json");
    peer.push_text(r#"{"type":"mystery","payload":{}}"#);
    for target in ["a", "b", "c"] {
        peer.push_text(format!(
            r#"{{"type":"interaction","payload":{{"type":"click","target":"{target}"}}}}"#
        ));
    }

    let mut seen = 0;
    while seen < 3 {
        if let StoreEvent::RealtimeChanged(_) = events.recv().await.unwrap() {
            seen += 1;
        }
    }

    let targets: Vec<_> = h
        .store
        .realtime_data()
        .recent_interactions
        .iter()
        .map(|i| i.target.clone().unwrap())
        .collect();
    assert_eq!(targets, vec!["c", "b", "a"]);
    assert!(h.handle.state().is_open());
    assert_eq!(
        h.metrics
            .counter_get(names::FRAMES_DROPPED, &[("type", "malformed")]),
        1
    );
    assert_eq!(
        h.metrics.counter_get(names::FRAMES_DROPPED, &[("type", "unknown")]),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn sends_are_discarded_unless_open() {
    let mut h = harness(vec![]);
    h.handle.send(OutboundMessage::heartbeat());
    let mut peer = open(&mut h).await;
    assert!(peer.drain_sent().is_empty());
    assert_eq!(h.metrics.counter_get(names::MESSAGES_DISCARDED, &[]), 1);

    h.handle.send(OutboundMessage::heartbeat());
    let sent = peer.next_sent().await.unwrap();
    assert_eq!(message_type(&sent), "heartbeat");
}
