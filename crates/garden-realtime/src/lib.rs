//! # garden-realtime
//!
//! Live garden updates over a WebSocket.
//!
//! - [`state_machine`]: pure connection lifecycle, backoff and degradation
//! - [`manager`]: the tokio task that drives it ([`ConnectionManager`])
//! - [`router`]: applies inbound frames to the shared store
//! - [`transport`]: socket abstraction with a tokio-tungstenite backend
//! - [`mock`]: scripted transport for tests

#![deny(unsafe_code)]

pub mod endpoint;
pub mod manager;
pub mod mock;
pub mod router;
pub mod state_machine;
pub mod transport;

pub use endpoint::endpoint_from_origin;
pub use manager::{ConnectionHandle, ConnectionManager};
pub use router::{MessageRouter, RouteOutcome};
pub use state_machine::{transition, ConnectionEvent, Effect, ReconnectPolicy};
pub use transport::{Frame, Socket, Transport, WsTransport};
