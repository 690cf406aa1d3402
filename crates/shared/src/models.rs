//! Commands accepted from the application and events published back to it.
//!
//! Both directions travel as `{ "tag": ..., "data": { ... } }` envelopes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CommandError;

/// Socket name used when a command does not name one.
pub const DEFAULT_SOCKET: &str = "default";

/// Envelope tag names.
pub mod tags {
    pub const CREATE_SOCKET: &str = "CreateSocket";
    pub const CREATE_CHANNEL: &str = "CreateChannel";
    pub const CREATE_PUSH: &str = "CreatePush";
    pub const LEAVE_CHANNEL: &str = "LeaveChannel";
    pub const DISCONNECT: &str = "Disconnect";

    pub const SOCKET_OPENED: &str = "SocketOpened";
    pub const SOCKET_CLOSED: &str = "SocketClosed";
    pub const SOCKET_ERRORED: &str = "SocketErrored";
    pub const CHANNEL_JOINED: &str = "ChannelJoined";
    pub const CHANNEL_JOIN_ERROR: &str = "ChannelJoinError";
    pub const CHANNEL_JOIN_TIMEOUT: &str = "ChannelJoinTimeout";
    pub const CHANNEL_LEFT: &str = "ChannelLeft";
    pub const CHANNEL_LEAVE_ERROR: &str = "ChannelLeaveError";
    pub const CHANNEL_MESSAGE_RECEIVED: &str = "ChannelMessageReceived";
}

/// Untyped `{tag, data}` envelope as it arrives from the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(tag: impl Into<String>, data: Value) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }
}

/// Treats an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payloads default to an empty object, never `null`.
fn payload_or_empty<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(empty_payload()),
        Some(value) => Ok(value),
    }
}

/// `{}`
pub fn empty_payload() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSocket {
    pub endpoint: String,
    /// Connection params, sent as query parameters on the socket URL.
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: Map<String, Value>,
    /// Log every frame the socket sends and receives.
    #[serde(default, deserialize_with = "null_as_default")]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CreateSocket {
    pub fn socket_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_SOCKET)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,
    pub topic: String,
    /// Join payload.
    #[serde(default = "empty_payload", deserialize_with = "payload_or_empty")]
    pub payload: Value,
    /// Event names to forward as `ChannelMessageReceived`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<String>,
}

impl CreateChannel {
    /// The socket named by the command, if any.
    pub fn socket_name(&self) -> Option<&str> {
        self.socket_name.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePush {
    pub topic: String,
    pub event: String,
    #[serde(default = "empty_payload", deserialize_with = "payload_or_empty")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveChannel {
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_name: Option<String>,
}

impl Disconnect {
    pub fn socket_name(&self) -> Option<&str> {
        self.socket_name.as_deref()
    }
}

/// A validated inbound command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", content = "data")]
pub enum Command {
    CreateSocket(CreateSocket),
    CreateChannel(CreateChannel),
    CreatePush(CreatePush),
    LeaveChannel(LeaveChannel),
    Disconnect(Disconnect),
}

impl Command {
    /// Parse one JSON envelope.
    pub fn from_json(text: &str) -> Result<Self, CommandError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(CommandError::Envelope)?;
        Self::try_from(envelope)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Command::CreateSocket(_) => tags::CREATE_SOCKET,
            Command::CreateChannel(_) => tags::CREATE_CHANNEL,
            Command::CreatePush(_) => tags::CREATE_PUSH,
            Command::LeaveChannel(_) => tags::LEAVE_CHANNEL,
            Command::Disconnect(_) => tags::DISCONNECT,
        }
    }
}

impl TryFrom<Envelope> for Command {
    type Error = CommandError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { tag, data } = envelope;
        let data = if data.is_null() { empty_payload() } else { data };

        let parsed = match tag.as_str() {
            tags::CREATE_SOCKET => Some(serde_json::from_value(data).map(Command::CreateSocket)),
            tags::CREATE_CHANNEL => Some(serde_json::from_value(data).map(Command::CreateChannel)),
            tags::CREATE_PUSH => Some(serde_json::from_value(data).map(Command::CreatePush)),
            tags::LEAVE_CHANNEL => Some(serde_json::from_value(data).map(Command::LeaveChannel)),
            tags::DISCONNECT => Some(serde_json::from_value(data).map(Command::Disconnect)),
            _ => None,
        };

        match parsed {
            Some(result) => result.map_err(|source| CommandError::Malformed { tag, source }),
            None => Err(CommandError::UnknownTag(tag)),
        }
    }
}

/// Events published back to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data")]
pub enum Event {
    SocketOpened {
        #[serde(rename = "socketName")]
        socket_name: String,
    },
    SocketClosed {
        #[serde(rename = "socketName")]
        socket_name: String,
    },
    SocketErrored {
        error: String,
        #[serde(rename = "socketName")]
        socket_name: String,
    },
    ChannelJoined {
        payload: Value,
        topic: String,
    },
    ChannelJoinError {
        payload: Value,
        topic: String,
    },
    ChannelJoinTimeout {
        topic: String,
    },
    ChannelLeft {
        payload: Value,
        topic: String,
    },
    ChannelLeaveError {
        payload: Value,
        topic: String,
    },
    ChannelMessageReceived {
        payload: Value,
        topic: String,
        message: String,
    },
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Event::SocketOpened { .. } => tags::SOCKET_OPENED,
            Event::SocketClosed { .. } => tags::SOCKET_CLOSED,
            Event::SocketErrored { .. } => tags::SOCKET_ERRORED,
            Event::ChannelJoined { .. } => tags::CHANNEL_JOINED,
            Event::ChannelJoinError { .. } => tags::CHANNEL_JOIN_ERROR,
            Event::ChannelJoinTimeout { .. } => tags::CHANNEL_JOIN_TIMEOUT,
            Event::ChannelLeft { .. } => tags::CHANNEL_LEFT,
            Event::ChannelLeaveError { .. } => tags::CHANNEL_LEAVE_ERROR,
            Event::ChannelMessageReceived { .. } => tags::CHANNEL_MESSAGE_RECEIVED,
        }
    }
}

/// Error payload in the shape Phoenix uses for replies: `{"reason": ...}`.
pub fn reason_payload(reason: &str) -> Value {
    serde_json::json!({ "reason": reason })
}
