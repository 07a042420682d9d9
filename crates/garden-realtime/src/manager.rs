//! Connection driver: owns the socket, the heartbeat and the reconnect
//! timer, and runs [`transition`] over everything that happens to them.

use std::collections::VecDeque;
use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use garden_core::messages::OutboundMessage;
use garden_core::{ConnectionState, RealtimeError, StateStore};
use garden_settings::RealtimeSettings;
use garden_telemetry::{names, MetricsRecorder};

use crate::endpoint::endpoint_from_origin;
use crate::router::MessageRouter;
use crate::state_machine::{transition, ConnectionEvent, Effect, ReconnectPolicy};
use crate::transport::{Frame, Socket, Transport};

type Handshake = Pin<Box<dyn Future<Output = Result<Box<dyn Socket>, RealtimeError>> + Send>>;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(OutboundMessage),
    Shutdown,
}

/// Builder for the realtime connection task.
pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    heartbeat_interval: Duration,
    command_queue_size: usize,
    transport: Arc<dyn Transport>,
    store: Arc<StateStore>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ConnectionManager {
    pub fn new(
        url: impl Into<String>,
        settings: &RealtimeSettings,
        transport: Arc<dyn Transport>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::from_settings(settings),
            heartbeat_interval: settings.heartbeat_interval(),
            command_queue_size: settings.command_queue_size.max(1),
            transport,
            store,
            metrics: None,
        }
    }

    /// Endpoint derived from the page origin plus the configured path.
    pub fn for_origin(
        origin: &str,
        settings: &RealtimeSettings,
        transport: Arc<dyn Transport>,
        store: Arc<StateStore>,
    ) -> Result<Self, RealtimeError> {
        let url = endpoint_from_origin(origin, &settings.path)?;
        Ok(Self::new(url, settings, transport, store))
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start the driver task. The connection stays `Disconnected` until
    /// [`ConnectionHandle::connect`] is called.
    pub fn spawn(self) -> ConnectionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(self.command_queue_size);
        let (status_tx, status_rx) = watch::channel(ConnectionState::default());
        let cancel = CancellationToken::new();

        let mut router = MessageRouter::new(Arc::clone(&self.store));
        if let Some(metrics) = &self.metrics {
            router = router.with_metrics(Arc::clone(metrics));
        }

        let driver = Driver {
            state: ConnectionState::default(),
            url: self.url,
            policy: self.policy,
            heartbeat_every: self.heartbeat_interval,
            transport: self.transport,
            store: self.store,
            router,
            metrics: self.metrics,
            status_tx,
            socket: None,
            handshake: None,
            heartbeat: None,
            reconnect: None,
        };
        let task = tokio::spawn(driver.run(commands_rx, cancel.clone()));

        ConnectionHandle {
            commands: commands_tx,
            status: status_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// The single owner of a running connection.
///
/// Dropping the handle cancels the driver; [`Self::shutdown`] also waits
/// for the close to finish.
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub async fn connect(&self) {
        self.command(Command::Connect).await;
    }

    pub async fn disconnect(&self) {
        self.command(Command::Disconnect).await;
    }

    /// Best-effort send. Discarded unless the connection is open.
    pub fn send(&self, message: OutboundMessage) {
        match self.commands.try_send(Command::Send(message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("command queue full, dropping outbound message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("connection task gone, dropping outbound message");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Wait until the state satisfies `pred`. `None` if the driver exited first.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut rx = self.status.clone();
        let state = rx.wait_for(pred).await.ok()?.clone();
        Some(state)
    }

    /// Close the connection cleanly and wait for the driver to exit.
    pub async fn shutdown(mut self) {
        self.command(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "connection task panicked");
            }
        }
    }

    async fn command(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("connection task gone, command ignored");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    state: ConnectionState,
    url: String,
    policy: ReconnectPolicy,
    heartbeat_every: Duration,
    transport: Arc<dyn Transport>,
    store: Arc<StateStore>,
    router: MessageRouter,
    metrics: Option<Arc<MetricsRecorder>>,
    status_tx: watch::Sender<ConnectionState>,
    socket: Option<Box<dyn Socket>>,
    handshake: Option<Handshake>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        debug!(url = %self.url, "connection driver started");
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    self.dispatch(ConnectionEvent::DisconnectRequested).await;
                    break;
                }

                command = commands.recv() => match command {
                    Some(Command::Connect) => self.dispatch(ConnectionEvent::ConnectRequested).await,
                    Some(Command::Disconnect) => self.dispatch(ConnectionEvent::DisconnectRequested).await,
                    Some(Command::Send(message)) => self.send_outbound(message).await,
                    Some(Command::Shutdown) | None => {
                        self.dispatch(ConnectionEvent::DisconnectRequested).await;
                        break;
                    }
                },

                result = poll_handshake(&mut self.handshake) => {
                    self.handshake = None;
                    match result {
                        Ok(socket) => {
                            self.socket = Some(socket);
                            self.dispatch(ConnectionEvent::HandshakeSucceeded).await;
                        }
                        Err(e) => {
                            self.count(names::CONNECT_FAILURES);
                            self.dispatch(ConnectionEvent::HandshakeFailed { reason: e.to_string() }).await;
                        }
                    }
                }

                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,

                () = heartbeat_tick(&mut self.heartbeat) => {
                    self.dispatch(ConnectionEvent::HeartbeatDue).await;
                }

                () = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.dispatch(ConnectionEvent::ReconnectTimerFired).await;
                }
            }
        }
        debug!(status = %self.state.status, "connection driver stopped");
    }

    async fn on_frame(&mut self, frame: Option<Result<Frame, RealtimeError>>) {
        let event = match frame {
            Some(Ok(Frame::Text(text))) => {
                self.count(names::FRAMES_RECEIVED);
                // Routed inline so store updates keep arrival order
                let _ = self.router.route(&text);
                return;
            }
            Some(Ok(Frame::Close { clean, reason })) => {
                info!(clean, reason = ?reason, "server closed connection");
                ConnectionEvent::ConnectionLost { clean, reason }
            }
            Some(Err(e)) => ConnectionEvent::ConnectionLost {
                clean: false,
                reason: Some(e.to_string()),
            },
            None => ConnectionEvent::ConnectionLost {
                clean: false,
                reason: Some("stream ended without close frame".into()),
            },
        };
        self.socket = None;
        self.dispatch(event).await;
    }

    /// Run an event and every follow-up event its effects produce.
    async fn dispatch(&mut self, event: ConnectionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let from = self.state.status;
            let (next, effects) = transition(&self.state, event, &self.policy);
            if next.status != from {
                debug!(from = %from, to = %next.status, attempts = next.reconnect_attempts, "connection transition");
            }
            self.state = next;
            self.publish();

            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<ConnectionEvent> {
        match effect {
            Effect::OpenSocket => {
                self.count(names::CONNECT_ATTEMPTS);
                info!(url = %self.url, attempt = self.state.reconnect_attempts, "connecting");
                let transport = Arc::clone(&self.transport);
                let url = self.url.clone();
                self.handshake = Some(Box::pin(async move { transport.connect(&url).await }));
            }
            Effect::CloseSocket => {
                self.handshake = None;
                if let Some(mut socket) = self.socket.take() {
                    if let Err(e) = socket.close().await {
                        debug!(error = %e, "close frame not delivered");
                    }
                }
                return Some(ConnectionEvent::Closed);
            }
            Effect::DropSocket => {
                self.handshake = None;
                self.socket = None;
                self.gauge_open(false);
            }
            Effect::StartHeartbeat => {
                let mut heartbeat =
                    interval_at(Instant::now() + self.heartbeat_every, self.heartbeat_every);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
                self.gauge_open(true);
                info!(url = %self.url, "realtime connection open");
            }
            Effect::StopHeartbeat => {
                self.heartbeat = None;
                self.gauge_open(false);
            }
            Effect::SendHeartbeat => {
                return self.write(OutboundMessage::heartbeat()).await.err();
            }
            Effect::SendVisitorJoined => {
                let hello = OutboundMessage::visitor_joined(self.store.session_id().clone());
                return self.write(hello).await.err();
            }
            Effect::ScheduleReconnect { delay, attempt } => {
                warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = self.state.last_error.as_deref().unwrap_or(""),
                    "connection lost, reconnect scheduled"
                );
                self.count(names::RECONNECTS_SCHEDULED);
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => {
                self.reconnect = None;
            }
            Effect::Notify(notice) => {
                if self.state.degraded {
                    let exhausted = RealtimeError::ExhaustedRetries {
                        attempts: self.state.reconnect_attempts,
                    };
                    error!(
                        error = %exhausted,
                        kind = exhausted.error_kind(),
                        last_error = self.state.last_error.as_deref().unwrap_or(""),
                        "continuing without realtime updates"
                    );
                }
                self.store.show_notification(notice);
            }
        }
        None
    }

    /// User sends go out only while open; anything else is discarded.
    async fn send_outbound(&mut self, message: OutboundMessage) {
        if !self.state.is_open() {
            debug!(kind = message.message_type().as_str(), status = %self.state.status, "not open, discarding outbound message");
            self.count(names::MESSAGES_DISCARDED);
            return;
        }
        if let Some(event) = self.write(message).await.err() {
            self.dispatch(event).await;
        }
    }

    async fn write(&mut self, message: OutboundMessage) -> Result<(), ConnectionEvent> {
        let kind = message.message_type().as_str();
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, kind, "failed to encode outbound message");
                return Ok(());
            }
        };
        let Some(socket) = self.socket.as_mut() else {
            return Err(ConnectionEvent::SendFailed {
                reason: "no open socket".into(),
            });
        };
        match socket.send_text(text).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.counter_inc(names::MESSAGES_SENT, &[("type", kind)], 1);
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, kind, "send failed");
                Err(ConnectionEvent::SendFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn publish(&self) {
        let state = &self.state;
        let _ = self.status_tx.send_if_modified(|current| {
            if current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
    }

    fn count(&self, name: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, &[], 1);
        }
    }

    fn gauge_open(&self, open: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.gauge_set(names::CONNECTION_OPEN, &[], if open { 1.0 } else { 0.0 });
        }
    }
}

async fn poll_handshake(handshake: &mut Option<Handshake>) -> Result<Box<dyn Socket>, RealtimeError> {
    match handshake {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn next_frame(socket: &mut Option<Box<dyn Socket>>) -> Option<Result<Frame, RealtimeError>> {
    match socket {
        Some(socket) => socket.next_frame().await,
        None => pending().await,
    }
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
