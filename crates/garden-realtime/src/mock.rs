//! Scripted in-memory transport for deterministic tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use garden_core::RealtimeError;

use crate::transport::{Frame, Socket, Transport};

/// Outcome of one `connect` call.
#[derive(Clone, Debug)]
pub enum MockConnect {
    /// Complete the handshake and hand a [`MockPeer`] to the test.
    Accept,
    /// Fail the handshake.
    Refuse(String),
    /// Wait, then resolve the inner outcome.
    Delay(Duration, Box<MockConnect>),
}

impl MockConnect {
    pub fn refuse(reason: &str) -> Self {
        Self::Refuse(reason.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockConnect) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Transport that plays a connect script in order, accepting once the
/// script runs out.
pub struct MockTransport {
    script: Mutex<VecDeque<MockConnect>>,
    connect_count: AtomicUsize,
    connect_times: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    /// The receiver yields the server side of every accepted connection.
    pub fn new(script: Vec<MockConnect>) -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(script.into()),
            connect_count: AtomicUsize::new(0),
            connect_times: Mutex::new(Vec::new()),
            peers,
        });
        (transport, peer_rx)
    }

    pub fn push(&self, outcome: MockConnect) {
        self.script.lock().push_back(outcome);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Instants at which `connect` was called, on the tokio clock.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Socket>, RealtimeError> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);
        self.connect_times.lock().push(Instant::now());

        let mut outcome = self.script.lock().pop_front().unwrap_or(MockConnect::Accept);
        loop {
            match outcome {
                MockConnect::Accept => break,
                MockConnect::Refuse(reason) => {
                    return Err(RealtimeError::ConnectionFailure(reason));
                }
                MockConnect::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
            }
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MockPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
            fail_sends: Arc::clone(&fail_sends),
            closed: Arc::clone(&closed),
        };
        // Test may have dropped the receiver; the socket still works.
        let _ = self.peers.send(peer);

        Ok(Box::new(MockSocket {
            inbound: inbound_rx,
            outbound: outbound_tx,
            fail_sends,
            closed,
        }))
    }
}

struct MockSocket {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<String>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send_text(&mut self, text: String) -> Result<(), RealtimeError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(RealtimeError::SendFailed("mock: send failure injected".into()));
        }
        self.outbound
            .send(text)
            .map_err(|_| RealtimeError::SendFailed("mock: peer dropped".into()))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, RealtimeError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Server side of an accepted mock connection.
///
/// Dropping the peer ends the client's frame stream, which the client
/// treats as an abnormal close.
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<Frame>,
    outbound: mpsc::UnboundedReceiver<String>,
    fail_sends: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Frame::Text(text.into()));
    }

    pub fn push_close(&self, clean: bool) {
        let _ = self.inbound.send(Frame::Close {
            clean,
            reason: None,
        });
    }

    /// Make every later client send fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::Relaxed);
    }

    /// Whether the client sent a close.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Everything the client has sent so far.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            sent.push(text);
        }
        sent
    }

    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}
