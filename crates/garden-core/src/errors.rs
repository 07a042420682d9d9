/// Failure taxonomy for the realtime subsystem.
///
/// None of these are fatal to the process: connection failures retry with
/// backoff, protocol problems drop the offending frame, and exhausted
/// retries leave the app running without live updates.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("connection failed: {0}")]
    ConnectionFailure(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),
    #[error("gave up reconnecting after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RealtimeError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailure(_) => "connection_failure",
            Self::Protocol(_) => "protocol",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::ExhaustedRetries { .. } => "exhausted_retries",
            Self::SendFailed(_) => "send_failed",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
