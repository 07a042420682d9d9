//! Socket abstraction plus the tokio-tungstenite implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use garden_core::RealtimeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the driver sees from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close frame from the peer. `clean` only for an explicit 1000 status.
    Close { clean: bool, reason: Option<String> },
}

#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError>;

    /// Next data or close frame. `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, RealtimeError>>;

    async fn close(&mut self) -> Result<(), RealtimeError>;
}

/// Opens sockets. Swapped for [`crate::mock::MockTransport`] in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, RealtimeError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, RealtimeError> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::ConnectionFailure(format!("{url}: {e}")))?;
        debug!(url, status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsSocket { ws }))
    }
}

struct WsSocket {
    ws: WsStream,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| RealtimeError::SendFailed(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, RealtimeError>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(RealtimeError::ConnectionFailure(e.to_string()))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                    }
                },
                Message::Close(frame) => return Some(Ok(close_frame(frame))),
                // Pings are answered by tungstenite on the next write/flush
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| RealtimeError::SendFailed(e.to_string()))
    }
}

/// Only an explicit 1000 is clean. A close with no status (1005) is treated
/// like any other abnormal close and reconnects.
fn close_frame(frame: Option<CloseFrame>) -> Frame {
    match frame {
        Some(f) => {
            let reason = f.reason.to_string();
            Frame::Close {
                clean: f.code == CloseCode::Normal,
                reason: (!reason.is_empty()).then_some(reason),
            }
        }
        None => Frame::Close {
            clean: false,
            reason: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: CloseCode, reason: &str) -> Option<CloseFrame> {
        Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })
    }

    #[test]
    fn normal_status_is_clean() {
        assert_eq!(
            close_frame(status(CloseCode::Normal, "bye")),
            Frame::Close {
                clean: true,
                reason: Some("bye".into())
            }
        );
    }

    #[test]
    fn missing_status_is_abnormal() {
        assert_eq!(
            close_frame(None),
            Frame::Close {
                clean: false,
                reason: None
            }
        );
    }

    #[test]
    fn other_codes_are_abnormal() {
        for code in [CloseCode::Away, CloseCode::Error, CloseCode::Status, CloseCode::Abnormal] {
            let Frame::Close { clean, reason } = close_frame(status(code, "")) else {
                panic!("expected a close frame");
            };
            assert!(!clean, "{code:?}");
            assert_eq!(reason, None);
        }
    }
}
