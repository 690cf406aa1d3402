//! The socket-client seam the bridge drives, plus the native Phoenix socket.
//!
//! A client reports everything that happens to a socket through a single
//! [`Notice`] stream: lifecycle changes, one reply per join or leave, and
//! channel messages. The bridge never waits on a client call.

use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use phoenix_ports_shared::{empty_payload, reason_payload, VSN};
use serde_json::{Map, Value};
use tokio::sync::watch;
use url::Url;

use crate::error::ClientError;

/// Connection state for a socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Timing knobs for a socket
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// How long a join or leave waits for its reply
    pub timeout: Duration,
    /// Interval between heartbeats; a heartbeat unanswered by the next tick closes the socket
    pub heartbeat_interval: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(30_000),
        }
    }
}

/// Bridge-assigned identity of one connection attempt.
///
/// Names can be reused by later `CreateSocket` commands; ids never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

/// Everything a connector needs to open a socket
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub id: SocketId,
    pub name: String,
    pub endpoint: String,
    pub params: Map<String, Value>,
    pub debug: bool,
}

/// Outcome of a join or leave
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    Error(Value),
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    Opened,
    Closed,
    Errored(String),
    JoinReply { topic: String, reply: Reply },
    LeaveReply { topic: String, reply: Reply },
    Message {
        topic: String,
        event: String,
        payload: Value,
    },
}

/// A report from a socket client to the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub socket: SocketId,
    pub socket_name: String,
    pub kind: NoticeKind,
}

pub type NoticeSender = UnboundedSender<Notice>;

/// Operations the bridge performs on an open socket.
///
/// Every `join` and every `leave` must eventually produce exactly one
/// `JoinReply` / `LeaveReply` notice.
pub trait SocketClient {
    fn is_connected(&self) -> bool;
    fn disconnect(&self);
    fn join(&self, topic: &str, payload: Value);
    fn leave(&self, topic: &str);
    fn push(&self, topic: &str, event: &str, payload: Value);
}

/// Opens sockets for the bridge.
pub trait Connector {
    type Socket: SocketClient;

    fn connect(
        &mut self,
        request: ConnectRequest,
        notices: NoticeSender,
    ) -> Result<Self::Socket, ClientError>;
}

/// Commands queued from a [`PhoenixSocket`] handle to its connection task
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Join { topic: String, payload: Value },
    Leave { topic: String },
    Push {
        topic: String,
        event: String,
        payload: Value,
    },
    Disconnect,
}

/// Handle for a native Phoenix socket
#[derive(Clone)]
pub struct PhoenixSocket {
    id: SocketId,
    pub name: String,
    sender: UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
    notices: NoticeSender,
}

impl PhoenixSocket {
    pub(crate) fn new(
        id: SocketId,
        name: String,
        sender: UnboundedSender<Outbound>,
        state: watch::Receiver<ConnectionState>,
        notices: NoticeSender,
    ) -> Self {
        Self {
            id,
            name,
            sender,
            state,
            notices,
        }
    }

    /// Queue a command for the connection task.
    ///
    /// Once the task has exited its queue is closed; joins and leaves sent
    /// after that point are answered here so they still get their reply.
    fn send(&self, outbound: Outbound) {
        let Err(err) = self.sender.unbounded_send(outbound) else {
            return;
        };
        let kind = match err.into_inner() {
            Outbound::Join { topic, .. } => NoticeKind::JoinReply {
                topic,
                reply: Reply::Error(reason_payload("socket closed")),
            },
            Outbound::Leave { topic } => NoticeKind::LeaveReply {
                topic,
                reply: Reply::Ok(empty_payload()),
            },
            other => {
                crate::log_debug!("Socket '{}' is closed, dropping {:?}", self.name, other);
                return;
            }
        };
        let _ = self.notices.unbounded_send(Notice {
            socket: self.id,
            socket_name: self.name.clone(),
            kind,
        });
    }
}

impl SocketClient for PhoenixSocket {
    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn disconnect(&self) {
        self.send(Outbound::Disconnect);
    }

    fn join(&self, topic: &str, payload: Value) {
        self.send(Outbound::Join {
            topic: topic.to_string(),
            payload,
        });
    }

    fn leave(&self, topic: &str) {
        self.send(Outbound::Leave {
            topic: topic.to_string(),
        });
    }

    fn push(&self, topic: &str, event: &str, payload: Value) {
        self.send(Outbound::Push {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

/// Build the websocket URL for a Phoenix endpoint.
///
/// `http(s)` maps to `ws(s)`, the `/websocket` transport segment is appended
/// and `params` plus `vsn` go into the query string.
pub fn endpoint_url(endpoint: &str, params: &Map<String, Value>) -> Result<Url, ClientError> {
    let mut url = Url::parse(endpoint).map_err(|source| ClientError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(url.scheme().to_string()))?;

    let base = url.path().trim_end_matches('/').to_string();
    if !base.ends_with("/websocket") {
        url.set_path(&format!("{}/websocket", base));
    }

    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            match value {
                Value::String(s) => query.append_pair(key, s),
                other => query.append_pair(key, &other.to_string()),
            };
        }
        query.append_pair("vsn", VSN);
    }

    Ok(url)
}

mod connection_native;
pub use connection_native::PhoenixConnector;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_endpoint_url_appends_transport_and_vsn() {
        let url = endpoint_url("wss://x/socket", &Map::new()).unwrap();
        assert_eq!(url.as_str(), "wss://x/socket/websocket?vsn=2.0.0");
    }

    #[test]
    fn test_endpoint_url_maps_http_schemes() {
        let url = endpoint_url("http://localhost:4000/socket/", &Map::new()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:4000/socket/websocket?vsn=2.0.0");

        let url = endpoint_url("https://example.com", &Map::new()).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/websocket?vsn=2.0.0");
    }

    #[test]
    fn test_endpoint_url_encodes_params() {
        let url = endpoint_url(
            "ws://localhost:4000/socket/websocket",
            &params(json!({"token": "a b", "user_id": 42})),
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:4000/socket/websocket?token=a+b&user_id=42&vsn=2.0.0"
        );
    }

    #[test]
    fn test_endpoint_url_rejects_bad_input() {
        assert!(matches!(
            endpoint_url("/socket", &Map::new()),
            Err(ClientError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            endpoint_url("ftp://x/socket", &Map::new()),
            Err(ClientError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_closed_handle_still_answers_joins() {
        let (sender, receiver) = futures_channel::mpsc::unbounded();
        let (notices, mut notice_rx) = futures_channel::mpsc::unbounded();
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        drop(receiver);

        let socket = PhoenixSocket::new(SocketId(1), "s1".to_string(), sender, state_rx, notices);
        socket.join("room:1", json!({}));
        socket.leave("room:1");
        socket.push("room:1", "new_msg", json!({}));

        assert!(!socket.is_connected());
        let join = notice_rx.try_next().unwrap().unwrap();
        assert_eq!(
            join.kind,
            NoticeKind::JoinReply {
                topic: "room:1".to_string(),
                reply: Reply::Error(json!({"reason": "socket closed"})),
            }
        );
        let leave = notice_rx.try_next().unwrap().unwrap();
        assert_eq!(
            leave.kind,
            NoticeKind::LeaveReply {
                topic: "room:1".to_string(),
                reply: Reply::Ok(json!({})),
            }
        );
        assert!(notice_rx.try_next().is_err());
    }
}
