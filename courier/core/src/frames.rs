//! Wire Frames
//!
//! Frames exchanged with the messaging backend. Inbound frames are decoded
//! once, at the connection boundary, into the [`InboundFrame`] sum type;
//! everything downstream works with typed payloads.
//!
//! # Classification
//!
//! Inbound frames carry a string discriminant in `type`. Classification is a
//! fixed-priority match:
//!
//! 1. `type == "chat_message"`, or a truthy `message` field (servers that omit
//!    the discriminant) → message stream
//! 2. `type == "notification"` → notification stream
//! 3. `type == "typing_indicator"` → typing stream
//! 4. anything else → [`InboundFrame::Unknown`], dropped by the manager
//!
//! "Truthy" follows the backend's JavaScript heritage: `null`, `false`, `0`
//! and `""` do not count as a message.
//!
//! # Outbound Frames
//!
//! ```text
//! { "type": "chat_message", "message": "...", "conversation_id": "..." }
//! { "type": "typing_start", "conversation_id": "..." }
//! { "type": "typing_stop",  "conversation_id": "..." }
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Discriminant of chat message frames
pub const CHAT_MESSAGE: &str = "chat_message";
/// Discriminant of notification frames
pub const NOTIFICATION: &str = "notification";
/// Discriminant of typing indicator frames
pub const TYPING_INDICATOR: &str = "typing_indicator";

/// Errors decoding or encoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame was recognized but its payload has the wrong shape
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// Which frame kind failed validation
        kind: &'static str,
        /// The underlying decode error
        #[source]
        source: serde_json::Error,
    },

    /// An outbound frame could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a chat conversation
///
/// The backend uses both numeric and string identifiers; both decode here
/// and always encode as a string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a raw identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ConversationId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Unsigned(n) => Self(n.to_string()),
            RawId::Signed(n) => Self(n.to_string()),
        })
    }
}

// ============================================================================
// Inbound Payloads
// ============================================================================

/// A chat message delivered to the message stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message body; a string or a full message record depending on the server
    #[serde(default)]
    pub message: Value,

    /// Conversation the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,

    /// Sender record or identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Value>,

    /// Any other fields, including the discriminant
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Text of the message
    ///
    /// Either the `message` string itself or the `content` of a message record.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            Value::String(s) => Some(s),
            Value::Object(record) => record.get("content").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Notification record as stored by the backend
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Record identifier
    #[serde(default)]
    pub id: Option<Value>,
    /// Notification category (`APPLICATION_RECEIVED`, `NEW_MESSAGE`, ...)
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Short title
    #[serde(default)]
    pub title: Option<String>,
    /// Human-readable body
    #[serde(default)]
    pub message: Option<String>,
    /// Category-specific data
    #[serde(default)]
    pub data: Option<Value>,
    /// Whether the user has read it
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_read: bool,
    /// Creation timestamp as sent by the server
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A frame delivered to the notification stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// The notification record, when the server nests one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,

    /// Any other fields, including the discriminant
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A frame delivered to the typing stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// Conversation the indicator belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Who is typing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    /// Display name of who is typing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Started (`true`) or stopped (`false`) typing
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_typing: bool,

    /// Any other fields, including the discriminant
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Inbound Frame
// ============================================================================

/// Logical stream a frame is fanned out to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Chat messages
    Messages,
    /// Notifications
    Notifications,
    /// Typing indicators
    Typing,
}

/// A decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Tagged `chat_message`
    ChatMessage(ChatMessage),
    /// Untagged (or otherwise tagged) frame carrying a truthy `message` field
    BareMessage(ChatMessage),
    /// Tagged `notification`
    Notification(NotificationEvent),
    /// Tagged `typing_indicator`
    TypingIndicator(TypingIndicator),
    /// Anything else
    Unknown(Value),
}

impl InboundFrame {
    /// Parse and classify a text frame
    ///
    /// # Errors
    ///
    /// `FrameError::Malformed` if the text is not JSON, or
    /// `FrameError::InvalidPayload` if a recognized frame has the wrong shape.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        Self::classify(value)
    }

    /// Classify an already-parsed frame
    ///
    /// # Errors
    ///
    /// `FrameError::InvalidPayload` if a recognized frame has the wrong shape.
    pub fn classify(value: Value) -> Result<Self, FrameError> {
        let Value::Object(ref object) = value else {
            return Ok(Self::Unknown(value));
        };

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let has_message = object.get("message").is_some_and(is_truthy);

        match kind.as_deref() {
            Some(CHAT_MESSAGE) => payload(CHAT_MESSAGE, value).map(Self::ChatMessage),
            _ if has_message => payload(CHAT_MESSAGE, value).map(Self::BareMessage),
            Some(NOTIFICATION) => payload(NOTIFICATION, value).map(Self::Notification),
            Some(TYPING_INDICATOR) => payload(TYPING_INDICATOR, value).map(Self::TypingIndicator),
            _ => Ok(Self::Unknown(value)),
        }
    }

    /// Stream this frame is delivered to, `None` for unknown frames
    #[must_use]
    pub fn stream(&self) -> Option<StreamKind> {
        match self {
            Self::ChatMessage(_) | Self::BareMessage(_) => Some(StreamKind::Messages),
            Self::Notification(_) => Some(StreamKind::Notifications),
            Self::TypingIndicator(_) => Some(StreamKind::Typing),
            Self::Unknown(_) => None,
        }
    }

    /// Short name for logging
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => CHAT_MESSAGE,
            Self::BareMessage(_) => "bare_message",
            Self::Notification(_) => NOTIFICATION,
            Self::TypingIndicator(_) => TYPING_INDICATOR,
            Self::Unknown(_) => "unknown",
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|source| FrameError::InvalidPayload { kind, source })
}

/// Read an optional flag, treating `null` like a missing key
fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// JavaScript truthiness of a JSON value
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Outbound Frame
// ============================================================================

/// A frame sent to the backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Post a chat message
    ChatMessage {
        /// Message text
        message: String,
        /// Target conversation
        conversation_id: Option<ConversationId>,
    },
    /// The user started typing
    TypingStart {
        /// Conversation being typed in
        conversation_id: Option<ConversationId>,
    },
    /// The user stopped typing
    TypingStop {
        /// Conversation being typed in
        conversation_id: Option<ConversationId>,
    },
}

impl OutboundFrame {
    /// Serialize to the JSON text sent on the wire
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Discriminant of this frame
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => CHAT_MESSAGE,
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
        }
    }
}
