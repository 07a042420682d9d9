//! Pure connection state machine.
//!
//! `transition` maps `(state, event)` to `(next state, effects)` and never
//! touches a socket or a timer. The driver in [`crate::manager`] executes
//! the effects and feeds the outcomes back in as new events.

use std::time::Duration;

use garden_core::state::{Notice, NoticeKind};
use garden_core::{ConnectionState, ConnectionStatus};
use garden_settings::RealtimeSettings;

/// Bounded exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exponential = base.saturating_mul(1u64 << attempt.min(31));
        Duration::from_millis(exponential).min(self.max_delay)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    HandshakeSucceeded,
    HandshakeFailed { reason: String },
    /// The peer closed or the stream broke. `clean` is a normal close frame.
    ConnectionLost { clean: bool, reason: Option<String> },
    SendFailed { reason: String },
    HeartbeatDue,
    ReconnectTimerFired,
    DisconnectRequested,
    /// Graceful close finished.
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    OpenSocket,
    /// Send a close frame, then report [`ConnectionEvent::Closed`].
    CloseSocket,
    /// Abandon the socket or in-flight handshake without a close frame.
    DropSocket,
    StartHeartbeat,
    StopHeartbeat,
    SendHeartbeat,
    SendVisitorJoined,
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    Notify(Notice),
}

pub fn transition(
    state: &ConnectionState,
    event: ConnectionEvent,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<Effect>) {
    use ConnectionEvent as E;
    use ConnectionStatus as S;

    let mut next = state.clone();
    let mut effects = Vec::new();

    match (state.status, event) {
        (S::Disconnected, E::ConnectRequested) => {
            if state.reconnect_pending {
                effects.push(Effect::CancelReconnect);
            }
            next.status = S::Connecting;
            next.reconnect_pending = false;
            next.reconnect_attempts = 0;
            next.degraded = false;
            effects.push(Effect::OpenSocket);
        }
        (S::Connecting | S::Open | S::Closing, E::ConnectRequested) => {}

        (S::Connecting, E::HandshakeSucceeded) => {
            next.status = S::Open;
            next.reconnect_attempts = 0;
            next.last_error = None;
            next.degraded = false;
            effects.push(Effect::StartHeartbeat);
            effects.push(Effect::SendVisitorJoined);
            effects.push(Effect::Notify(notices::connected()));
        }

        (S::Connecting, E::HandshakeFailed { reason })
        | (S::Connecting, E::SendFailed { reason }) => {
            fail(state, &mut next, &mut effects, reason, policy);
        }
        (S::Connecting, E::ConnectionLost { reason, .. }) => {
            let reason = reason.unwrap_or_else(|| "connection lost during handshake".into());
            fail(state, &mut next, &mut effects, reason, policy);
        }

        (S::Open, E::ConnectionLost { clean: true, .. }) => {
            next.status = S::Disconnected;
            effects.push(Effect::StopHeartbeat);
            effects.push(Effect::DropSocket);
        }
        (S::Open, E::ConnectionLost { clean: false, reason }) => {
            let reason = reason.unwrap_or_else(|| "connection closed abnormally".into());
            fail(state, &mut next, &mut effects, reason, policy);
        }
        (S::Open, E::SendFailed { reason }) => {
            fail(state, &mut next, &mut effects, reason, policy);
        }

        (S::Open, E::HeartbeatDue) => effects.push(Effect::SendHeartbeat),
        (_, E::HeartbeatDue) => {}

        (S::Disconnected, E::ReconnectTimerFired) if state.reconnect_pending => {
            next.status = S::Connecting;
            next.reconnect_pending = false;
            next.reconnect_attempts = state.reconnect_attempts + 1;
            effects.push(Effect::OpenSocket);
        }
        (_, E::ReconnectTimerFired) => {}

        (S::Open, E::DisconnectRequested) => {
            next.status = S::Closing;
            next.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
            effects.push(Effect::StopHeartbeat);
            effects.push(Effect::CloseSocket);
        }
        (S::Connecting, E::DisconnectRequested) => {
            next.status = S::Disconnected;
            next.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
            effects.push(Effect::DropSocket);
        }
        (S::Disconnected, E::DisconnectRequested) => {
            if state.reconnect_pending {
                next.reconnect_pending = false;
                effects.push(Effect::CancelReconnect);
            }
        }
        (S::Closing, E::DisconnectRequested) => {}

        (S::Closing, E::Closed)
        | (S::Closing, E::ConnectionLost { .. })
        | (S::Closing, E::SendFailed { .. }) => {
            next.status = S::Disconnected;
            effects.push(Effect::DropSocket);
        }

        // Late completions from a socket that was already abandoned.
        (_, E::HandshakeSucceeded)
        | (_, E::HandshakeFailed { .. })
        | (_, E::ConnectionLost { .. })
        | (_, E::SendFailed { .. })
        | (_, E::Closed) => {}
    }

    (next, effects)
}

/// Abnormal loss: back off and retry, or give up and mark degraded.
fn fail(
    state: &ConnectionState,
    next: &mut ConnectionState,
    effects: &mut Vec<Effect>,
    reason: String,
    policy: &ReconnectPolicy,
) {
    if state.status == ConnectionStatus::Open {
        effects.push(Effect::StopHeartbeat);
    }
    effects.push(Effect::DropSocket);

    next.status = ConnectionStatus::Disconnected;
    next.last_error = Some(reason);

    let attempts = state.reconnect_attempts;
    if attempts < policy.max_attempts {
        next.reconnect_pending = true;
        effects.push(Effect::ScheduleReconnect {
            delay: policy.delay_for(attempts),
            attempt: attempts + 1,
        });
        // One notice per outage, not per retry
        if attempts == 0 {
            effects.push(Effect::Notify(notices::limited()));
        }
    } else {
        next.reconnect_pending = false;
        next.degraded = true;
        effects.push(Effect::Notify(notices::degraded(attempts)));
    }
}

pub mod notices {
    use super::{Notice, NoticeKind};

    pub fn connected() -> Notice {
        Notice::new(
            NoticeKind::Success,
            "Connected",
            "Real-time garden updates are live.",
        )
    }

    pub fn limited() -> Notice {
        Notice::new(
            NoticeKind::Warning,
            "Connection issues",
            "Limited real-time features while we reconnect.",
        )
    }

    pub fn degraded(attempts: u32) -> Notice {
        Notice::new(
            NoticeKind::Error,
            "Offline mode",
            format!(
                "Real-time updates are unavailable after {attempts} reconnect attempts. \
                 Everything else keeps working."
            ),
        )
        .persistent()
    }
}
