//! Wire messages: `{type, payload, timestamp}` JSON envelopes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RealtimeError;
use crate::ids::SessionId;
use crate::state::WeatherPatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    WeatherUpdate,
    ProjectGrowth,
    VisitorJoined,
    VisitorLeft,
    Interaction,
    Heartbeat,
}

impl MessageType {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "weather_update" => Some(Self::WeatherUpdate),
            "project_growth" => Some(Self::ProjectGrowth),
            "visitor_joined" => Some(Self::VisitorJoined),
            "visitor_left" => Some(Self::VisitorLeft),
            "interaction" => Some(Self::Interaction),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeatherUpdate => "weather_update",
            Self::ProjectGrowth => "project_growth",
            Self::VisitorJoined => "visitor_joined",
            Self::VisitorLeft => "visitor_left",
            Self::Interaction => "interaction",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Envelope as it arrives, before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct OutEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: Value,
    timestamp: String,
}

// ── Inbound payloads ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGrowth {
    pub project_id: String,
    pub growth: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorPresence {
    pub session_id: Option<String>,
    /// Authoritative count from the server, when it sends one.
    pub visitor_count: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    WeatherUpdate(WeatherPatch),
    ProjectGrowth(ProjectGrowth),
    VisitorJoined(VisitorPresence),
    VisitorLeft(VisitorPresence),
    Interaction(InteractionPayload),
    Heartbeat,
}

impl Inbound {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::WeatherUpdate(_) => MessageType::WeatherUpdate,
            Self::ProjectGrowth(_) => MessageType::ProjectGrowth,
            Self::VisitorJoined(_) => MessageType::VisitorJoined,
            Self::VisitorLeft(_) => MessageType::VisitorLeft,
            Self::Interaction(_) => MessageType::Interaction,
            Self::Heartbeat => MessageType::Heartbeat,
        }
    }
}

/// A decoded inbound frame. Consumed once by the router.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub message: Inbound,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Decode a text frame.
    ///
    /// Unrecognised types yield [`RealtimeError::UnknownMessageType`]; bad
    /// JSON or a payload of the wrong shape yields [`RealtimeError::Protocol`].
    pub fn decode(raw: &str) -> Result<Self, RealtimeError> {
        let envelope: RawEnvelope = serde_json::from_str(raw)?;
        let kind = MessageType::from_wire(&envelope.kind)
            .ok_or_else(|| RealtimeError::UnknownMessageType(envelope.kind.clone()))?;
        let payload = envelope.payload;
        let message = match kind {
            MessageType::WeatherUpdate => Inbound::WeatherUpdate(serde_json::from_value(payload)?),
            MessageType::ProjectGrowth => Inbound::ProjectGrowth(serde_json::from_value(payload)?),
            MessageType::VisitorJoined => Inbound::VisitorJoined(serde_json::from_value(payload)?),
            MessageType::VisitorLeft => Inbound::VisitorLeft(serde_json::from_value(payload)?),
            MessageType::Interaction => Inbound::Interaction(serde_json::from_value(payload)?),
            MessageType::Heartbeat => Inbound::Heartbeat,
        };
        Ok(Self {
            message,
            timestamp: envelope.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

// ── Outbound ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    VisitorJoined {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
}

impl OutboundMessage {
    pub fn visitor_joined(session_id: SessionId) -> Self {
        Self::VisitorJoined {
            session_id,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::VisitorJoined { .. } => MessageType::VisitorJoined,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
        }
    }

    pub fn encode(&self) -> Result<String, RealtimeError> {
        let (timestamp, payload) = match self {
            Self::VisitorJoined {
                session_id,
                timestamp,
            } => {
                let ts = iso(timestamp);
                (ts.clone(), serde_json::json!({ "sessionId": session_id, "timestamp": ts }))
            }
            Self::Heartbeat { timestamp } => {
                let ts = iso(timestamp);
                (ts.clone(), serde_json::json!({ "timestamp": ts }))
            }
        };
        let envelope = OutEnvelope {
            kind: self.message_type().as_str(),
            payload,
            timestamp,
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
