//! Wire codec for the notification channel.
//!
//! Inbound frames are JSON objects `{ "type", "data", "timestamp" }`; outbound
//! commands are JSON objects `{ "type", ...fields }`. The codec holds no state.

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Identifier of a notification, as the server issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationId {
    Int(i64),
    Str(String),
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        NotificationId::Int(id)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        NotificationId::Str(id.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        NotificationId::Str(id)
    }
}

/// Commands the client can send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Keep-alive; the server answers with `pong`.
    Ping,
    /// Mark a notification as read; the server answers with `marked_read`.
    MarkRead { notification_id: NotificationId },
}

/// Result of decoding one inbound frame.
#[derive(Debug)]
pub enum Decoded {
    /// A recognized frame to dispatch.
    Event(Event),
    /// Heartbeat reply; acknowledged silently.
    Pong,
    /// Valid frame with a tag this client does not know.
    Unknown(String),
}

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Parse one raw text frame.
pub fn decode(text: &str) -> Result<Decoded, CodecError> {
    let frame: InboundFrame = serde_json::from_str(text).map_err(CodecError::MalformedFrame)?;
    if frame.tag == "pong" {
        return Ok(Decoded::Pong);
    }
    Ok(match EventKind::from_wire(&frame.tag) {
        Some(kind) => Decoded::Event(Event::new(kind, frame.data, frame.timestamp)),
        None => Decoded::Unknown(frame.tag),
    })
}

/// Serialize a command to its wire text.
pub fn encode(command: &Command) -> Result<String, CodecError> {
    serde_json::to_string(command).map_err(CodecError::Encode)
}
