//! Chat payloads carried in STOMP frame bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Enter,
    Chat,
}

/// A chat message as it travels in a frame body:
/// `{"roomId":…,"type":"ENTER"|"CHAT","sender":…,"message":…}`.
///
/// Fields are private so a message cannot change after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    room_id: String,
    #[serde(rename = "type")]
    r#type: MessageType,
    sender: String,
    #[serde(rename = "message")]
    text: String,
}

impl ChatMessage {
    pub fn new(
        room_id: impl Into<String>,
        r#type: MessageType,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            r#type,
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Presence announcement published right after subscribing to a room.
    pub fn enter(room_id: &str, sender: &str) -> Self {
        Self::new(
            room_id,
            MessageType::Enter,
            sender,
            format!("{sender} entered room {room_id}."),
        )
    }

    pub fn chat(room_id: &str, sender: &str, text: &str) -> Self {
        Self::new(room_id, MessageType::Chat, sender, text)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn message_type(&self) -> MessageType {
        self.r#type
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn to_body(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict decode: every field must be present and `type` must be known.
    pub fn from_body(body: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// A message delivered on a subscribed room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Room of the subscription that delivered the frame.
    pub room_id: String,
    pub payload: ChatMessage,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(room_id: impl Into<String>, payload: ChatMessage) -> Self {
        Self {
            room_id: room_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}
