//! Wire protocol: JSON text frames in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tungstenite::Utf8Bytes;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::frame::coding::CloseCode;

use crate::utils::{GatewayError, Result};

/// Close code sent when no valid credential was presented.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Close code sent when the ready acknowledgement did not go out in time.
pub const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;

/// Shape of an inbound frame before validation. Both fields are optional so
/// that unknown actions can be told apart from garbage.
#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

/// A client command, validated once at the socket boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Unrecognized,
}

impl Command {
    /// Parse a text frame.
    ///
    /// Frames that are not a JSON object with string fields are a
    /// `ProtocolViolation`. Well-formed frames with an unknown action, or a
    /// `subscribe` without a topic, come back as `Unrecognized`. An
    /// `unsubscribe` without a topic is kept (with an empty topic) so it
    /// can be acknowledged as a no-op.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawCommand = serde_json::from_str(text)
            .map_err(|e| GatewayError::ProtocolViolation(e.to_string()))?;
        let topic = raw.topic.unwrap_or_default();

        Ok(match raw.action.as_deref() {
            Some("subscribe") if !topic.is_empty() => Command::Subscribe { topic },
            Some("unsubscribe") => Command::Unsubscribe { topic },
            _ => Command::Unrecognized,
        })
    }
}

/// Frames the gateway sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Ready,
    Subscribed { topic: String },
    Unsubscribed { topic: String },
    Error { topic: String, error: String },
    Patch { topic: String, payload: Value },
}

impl ServerMessage {
    pub fn forbidden(topic: &str) -> Self {
        ServerMessage::Error {
            topic: topic.to_string(),
            error: "forbidden".to_string(),
        }
    }

    /// Build a fan-out frame from a raw broker payload. JSON payloads are
    /// embedded structurally; anything else is carried as a JSON string.
    pub fn patch(topic: &str, raw_payload: &str) -> Self {
        let payload = serde_json::from_str::<Value>(raw_payload)
            .unwrap_or_else(|_| Value::String(raw_payload.to_string()));
        ServerMessage::Patch {
            topic: topic.to_string(),
            payload,
        }
    }

    pub fn to_ws(&self) -> Result<WsMessage> {
        Ok(WsMessage::text(serde_json::to_string(self)?))
    }
}

pub fn close_message(code: u16, reason: &'static str) -> WsMessage {
    WsMessage::Close(Some(close_frame(code, reason)))
}

pub fn close_frame(code: u16, reason: &'static str) -> CloseFrame {
    CloseFrame {
        code: CloseCode::from(code),
        reason: Utf8Bytes::from_static(reason),
    }
}
