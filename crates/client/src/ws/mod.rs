//! Phoenix Channels over websockets, driven by a command/event bridge.
//!
//! # Architecture
//!
//! ```text
//!   commands (Envelope)                 events (Event)
//!          │                                  ▲
//!          ▼                                  │
//! ┌──────────────────────────────────────────────────┐
//! │                     Bridge                       │
//! │   socket registry (name -> SocketHandle)         │
//! │   channel registry (topic -> ChannelHandle)      │
//! └──────────────────────────────────────────────────┘
//!          │ SocketClient calls               ▲ Notice stream
//!          ▼                                  │
//!   ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!   │PhoenixSocket │ │PhoenixSocket │ │PhoenixSocket │
//!   │ ("default")  │ │ ("admin")    │ │     ...      │
//!   └──────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! Each `PhoenixSocket` is a handle onto a connection task that owns the
//! websocket, the ref counter, pending replies and the heartbeat.

mod bridge;
pub mod connection;

pub use bridge::{Bridge, ChannelHandle, EventSender, SocketHandle};
pub use connection::{
    endpoint_url, ConnectRequest, ConnectionState, Connector, Notice, NoticeKind, NoticeSender,
    PhoenixConnector, PhoenixSocket, Reply, SocketClient, SocketId, SocketOptions,
};
