//! Phoenix Ports client
//!
//! Bridges an application's tagged command/event streams onto Phoenix
//! Channels websockets. The application sends [`Envelope`]s and receives
//! [`Event`]s; sockets and channels are addressed by name and topic.
//!
//! [`Envelope`]: phoenix_ports_shared::Envelope
//! [`Event`]: phoenix_ports_shared::Event

pub mod error;
pub mod logging;
pub mod ws;

pub use error::ClientError;
pub use logging::TransportLogger;
pub use ws::{Bridge, PhoenixConnector, SocketOptions};
