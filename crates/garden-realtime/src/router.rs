//! Applies inbound frames to the [`StateStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use garden_core::ids::InteractionId;
use garden_core::messages::{
    Inbound, InboundMessage, InteractionPayload, MessageType, ProjectGrowth, VisitorPresence,
};
use garden_core::state::Interaction;
use garden_core::{RealtimeError, StateStore};
use garden_telemetry::{names, MetricsRecorder};

#[derive(Clone, Debug, PartialEq)]
pub enum RouteOutcome {
    /// The store was updated.
    Applied(MessageType),
    /// Server heartbeat; nothing to apply.
    Acknowledged,
    /// Well-formed envelope with an unrecognised type.
    Unknown(String),
    /// Not JSON, or a payload of the wrong shape.
    Malformed(String),
}

impl RouteOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied(kind) => kind.as_str(),
            Self::Acknowledged => "heartbeat",
            Self::Unknown(_) => "unknown",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Maps each message type to exactly one store mutation.
///
/// A frame that cannot be decoded never reaches the store, so the store is
/// never left partially updated.
pub struct MessageRouter {
    store: Arc<StateStore>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl MessageRouter {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn route(&self, raw: &str) -> RouteOutcome {
        let outcome = match InboundMessage::decode(raw) {
            Ok(message) => self.apply(message),
            Err(RealtimeError::UnknownMessageType(kind)) => {
                warn!(kind = %kind, "ignoring unknown message type");
                RouteOutcome::Unknown(kind)
            }
            Err(e) => {
                warn!(error = %e, len = raw.len(), "discarding malformed message");
                RouteOutcome::Malformed(e.to_string())
            }
        };

        if let Some(metrics) = &self.metrics {
            let name = match outcome {
                RouteOutcome::Applied(_) | RouteOutcome::Acknowledged => names::FRAMES_ROUTED,
                RouteOutcome::Unknown(_) | RouteOutcome::Malformed(_) => names::FRAMES_DROPPED,
            };
            metrics.counter_inc(name, &[("type", outcome.label())], 1);
        }
        outcome
    }

    pub fn apply(&self, message: InboundMessage) -> RouteOutcome {
        let InboundMessage { message, timestamp } = message;
        let kind = message.message_type();
        match message {
            Inbound::WeatherUpdate(patch) => {
                self.store.update_weather(patch);
                self.store.touch_realtime(timestamp);
            }
            Inbound::ProjectGrowth(growth) => {
                if let Err(e) = self.apply_growth(growth, timestamp) {
                    warn!(error = %e, "discarding project_growth");
                    return RouteOutcome::Malformed(e.to_string());
                }
            }
            Inbound::VisitorJoined(presence) => self.apply_presence(presence, 1, timestamp),
            Inbound::VisitorLeft(presence) => self.apply_presence(presence, -1, timestamp),
            Inbound::Interaction(payload) => self.apply_interaction(payload, timestamp),
            Inbound::Heartbeat => {
                debug!("server heartbeat");
                return RouteOutcome::Acknowledged;
            }
        }
        debug!(kind = kind.as_str(), "applied realtime message");
        RouteOutcome::Applied(kind)
    }

    fn apply_growth(
        &self,
        growth: ProjectGrowth,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RealtimeError> {
        if !growth.growth.is_finite() {
            return Err(RealtimeError::Protocol(format!(
                "non-finite growth for project {}",
                growth.project_id
            )));
        }
        self.store
            .set_project_growth(growth.project_id, growth.growth.clamp(0.0, 1.0), timestamp);
        Ok(())
    }

    /// Server-provided counts win; otherwise adjust by `delta`, never below zero.
    fn apply_presence(&self, presence: VisitorPresence, delta: i64, timestamp: DateTime<Utc>) {
        match presence.visitor_count {
            Some(count) => self.store.set_active_visitors(count, timestamp),
            None => self.store.adjust_active_visitors(delta, timestamp),
        }
    }

    fn apply_interaction(&self, payload: InteractionPayload, timestamp: DateTime<Utc>) {
        self.store.push_interaction(Interaction {
            id: InteractionId::new(),
            kind: payload.kind,
            target: payload.target,
            session_id: payload.session_id,
            timestamp,
        });
    }
}
