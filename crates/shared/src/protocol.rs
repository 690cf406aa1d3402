//! Phoenix Channels V2 wire format.
//!
//! Frames are JSON arrays: `[join_ref, ref, topic, event, payload]`.
//!
//! Reserved events:
//! - `phx_join` / `phx_leave`: channel lifecycle requests
//! - `phx_reply`: reply to a request, payload `{"status": ..., "response": ...}`
//! - `phx_error` / `phx_close`: channel crashed / closed on the server
//! - `heartbeat`: keep-alive on the `"phoenix"` topic

use serde_json::{json, Value};

/// Protocol version sent as the `vsn` query parameter.
pub const VSN: &str = "2.0.0";

/// Topic used for socket-level frames such as heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";

/// One V2 protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PhxMessage {
    /// Ref of the join that opened the channel this frame belongs to.
    pub join_ref: Option<String>,
    /// Request ref, echoed back by the matching `phx_reply`.
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

impl PhxMessage {
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            join_ref: None,
            msg_ref: None,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    pub fn with_join_ref(mut self, join_ref: impl Into<String>) -> Self {
        self.join_ref = Some(join_ref.into());
        self
    }

    pub fn with_msg_ref(mut self, msg_ref: impl Into<String>) -> Self {
        self.msg_ref = Some(msg_ref.into());
        self
    }

    /// Join request. The join's own ref doubles as the channel's join_ref.
    pub fn join(join_ref: &str, topic: impl Into<String>, payload: Value) -> Self {
        Self::new(topic, PHX_JOIN, payload)
            .with_join_ref(join_ref)
            .with_msg_ref(join_ref)
    }

    pub fn leave(join_ref: Option<String>, msg_ref: &str, topic: impl Into<String>) -> Self {
        Self {
            join_ref,
            msg_ref: Some(msg_ref.to_string()),
            topic: topic.into(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self::new(PHOENIX_TOPIC, HEARTBEAT, json!({})).with_msg_ref(msg_ref)
    }

    /// Server reply to a request.
    pub fn reply(
        join_ref: Option<String>,
        msg_ref: Option<String>,
        topic: impl Into<String>,
        status: &str,
        response: Value,
    ) -> Self {
        Self {
            join_ref,
            msg_ref,
            topic: topic.into(),
            event: PHX_REPLY.to_string(),
            payload: json!({ "status": status, "response": response }),
        }
    }

    /// Parse a V2 frame from a JSON array.
    pub fn from_json(value: &Value) -> Option<Self> {
        let arr = value.as_array()?;
        if arr.len() != 5 {
            return None;
        }

        Some(PhxMessage {
            join_ref: arr[0].as_str().map(String::from),
            msg_ref: arr[1].as_str().map(String::from),
            topic: arr[2].as_str()?.to_string(),
            event: arr[3].as_str()?.to_string(),
            payload: arr[4].clone(),
        })
    }

    pub fn from_text(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_json(&value)
    }

    pub fn to_json(&self) -> Value {
        json!([
            self.join_ref,
            self.msg_ref,
            self.topic,
            self.event,
            self.payload
        ])
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }

    pub fn is_reply(&self) -> bool {
        self.event == PHX_REPLY
    }

    /// Split a `phx_reply` payload into its status and response.
    ///
    /// A missing response is reported as `{}`.
    pub fn reply_parts(&self) -> Option<(&str, Value)> {
        if !self.is_reply() {
            return None;
        }
        let status = self.payload.get("status")?.as_str()?;
        let response = self
            .payload
            .get("response")
            .cloned()
            .unwrap_or_else(|| json!({}));
        Some((status, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phx_message_parse() {
        let text = r#"["1", "2", "room:1", "new_msg", {"text": "hi"}]"#;
        let msg = PhxMessage::from_text(text).unwrap();

        assert_eq!(msg.join_ref.as_deref(), Some("1"));
        assert_eq!(msg.msg_ref.as_deref(), Some("2"));
        assert_eq!(msg.topic, "room:1");
        assert_eq!(msg.event, "new_msg");
        assert_eq!(msg.payload["text"], "hi");
    }

    #[test]
    fn test_broadcast_has_no_refs() {
        let msg = PhxMessage::from_text(r#"[null, null, "room:1", "new_msg", {}]"#).unwrap();
        assert_eq!(msg.join_ref, None);
        assert_eq!(msg.msg_ref, None);
    }

    #[test]
    fn test_join_frame() {
        let msg = PhxMessage::join("7", "room:1", json!({"token": "abc"}));
        assert_eq!(
            msg.to_json(),
            json!(["7", "7", "room:1", "phx_join", {"token": "abc"}])
        );
    }

    #[test]
    fn test_heartbeat_frame() {
        let msg = PhxMessage::heartbeat("3");
        assert_eq!(msg.to_text(), r#"[null,"3","phoenix","heartbeat",{}]"#);
    }

    #[test]
    fn test_reply_parts() {
        let msg = PhxMessage::reply(
            Some("1".to_string()),
            Some("1".to_string()),
            "room:1",
            "error",
            json!({"reason": "unauthorized"}),
        );
        let (status, response) = msg.reply_parts().unwrap();
        assert_eq!(status, "error");
        assert_eq!(response["reason"], "unauthorized");

        let push = PhxMessage::new("room:1", "new_msg", json!({}));
        assert!(push.reply_parts().is_none());
    }

    #[test]
    fn test_invalid_message_format() {
        assert!(PhxMessage::from_text(r#"["1", "1", "room:1", "phx_join"]"#).is_none());
        assert!(PhxMessage::from_text(r#"{"topic": "room:1"}"#).is_none());
        assert!(PhxMessage::from_text("garbage").is_none());
    }
}
