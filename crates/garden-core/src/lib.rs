pub mod complexity;
pub mod connection;
pub mod device;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod performance;
pub mod state;

pub use complexity::ComplexityLevel;
pub use connection::{ConnectionState, ConnectionStatus};
pub use device::DeviceCapabilities;
pub use errors::RealtimeError;
pub use state::{StateStore, StoreEvent};
