//! Real-time character sessions over WebSocket.
//!
//! Clients `join` a character's session, then `chat` with it or `update` it.
//! Updates fan out to every connection in the session.

pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod socket;

pub use connection::Connection;
pub use dispatch::{Relay, RelayError};
pub use protocol::{Inbound, Outbound, ProtocolError};
pub use registry::SessionRegistry;
pub use socket::{serve_connection, SocketSettings};
