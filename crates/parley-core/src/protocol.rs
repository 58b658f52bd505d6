//! Wire protocol: one JSON object per text frame, tagged by `"type"`.
//!
//! Field names are camelCase on the wire. [`ClientMessage`] flows from
//! client to hub, [`ServerEvent`] from hub to client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};
use crate::ids::{ChannelId, ConnectionId, MessageId, UserId};

/// A message sent by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Start receiving events for a channel.
    Subscribe {
        /// Target channel.
        channel_id: ChannelId,
    },
    /// Stop receiving events for a channel.
    Unsubscribe {
        /// Target channel.
        channel_id: ChannelId,
    },
    /// Post a chat message.
    Message {
        /// Target channel.
        channel_id: ChannelId,
        /// Message body.
        content: String,
        /// Parent message when this is a threaded reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
    },
    /// The sender is typing in a channel.
    Typing {
        /// Target channel.
        channel_id: ChannelId,
    },
    /// Application-level keepalive probe.
    Ping,
}

impl ClientMessage {
    /// Shorthand for a top-level chat message.
    pub fn chat(channel_id: ChannelId, content: impl Into<String>) -> Self {
        Self::Message {
            channel_id,
            content: content.into(),
            parent_id: None,
        }
    }

    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::Ping => "ping",
        }
    }

    /// Channel the message is scoped to, if any.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::Subscribe { channel_id }
            | Self::Unsubscribe { channel_id }
            | Self::Message { channel_id, .. }
            | Self::Typing { channel_id } => Some(*channel_id),
            Self::Ping => None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// A message record as returned by the message store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Store-assigned id.
    pub id: MessageId,
    /// Channel the message was posted to.
    pub channel_id: ChannelId,
    /// Author.
    pub user_id: UserId,
    /// Message body.
    pub content: String,
    /// Commit time.
    pub created_at: DateTime<Utc>,
    /// Parent message for threaded replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
}

/// An event pushed by the hub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Sent once, right after the connection is registered.
    Connected {
        /// The id minted for this connection.
        connection_id: ConnectionId,
        /// The identity bound to it.
        user_id: UserId,
    },
    /// Subscribe acknowledgment.
    Subscribed {
        /// Channel now subscribed.
        channel_id: ChannelId,
    },
    /// Unsubscribe acknowledgment.
    Unsubscribed {
        /// Channel no longer subscribed.
        channel_id: ChannelId,
    },
    /// A newly stored chat message.
    Message {
        /// Channel it was posted to.
        channel_id: ChannelId,
        /// The stored record.
        message: StoredMessage,
    },
    /// Someone is typing.
    Typing {
        /// Channel being typed in.
        channel_id: ChannelId,
        /// Who is typing.
        user_id: UserId,
    },
    /// A request from this connection failed.
    Error {
        /// Human-readable description.
        message: String,
        /// Channel the failed request targeted, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
    },
    /// Reply to [`ClientMessage::Ping`].
    Pong,
}

impl ServerEvent {
    /// Connection-level error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            channel_id: None,
        }
    }

    /// Error tied to one channel.
    pub fn channel_error(channel_id: ChannelId, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            channel_id: Some(channel_id),
        }
    }

    /// Wire name of this event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }

    /// Channel the event is scoped to, if any.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::Subscribed { channel_id }
            | Self::Unsubscribed { channel_id }
            | Self::Message { channel_id, .. }
            | Self::Typing { channel_id, .. } => Some(*channel_id),
            Self::Error { channel_id, .. } => *channel_id,
            Self::Connected { .. } | Self::Pong => None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Parse an inbound client frame.
///
/// Distinguishes non-JSON input, a missing or unknown `type` tag and a known
/// type with bad fields, so the hub can report a precise error.
pub fn decode_client_message(text: &str) -> Result<ClientMessage> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::NotAnObject);
    };
    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) | None => return Err(ProtocolError::MissingType),
    };
    if !matches!(
        kind.as_str(),
        "subscribe" | "unsubscribe" | "message" | "typing" | "ping"
    ) {
        return Err(ProtocolError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload { kind, source })
}

/// Parse an inbound server frame.
pub fn decode_server_event(text: &str) -> Result<ServerEvent> {
    serde_json::from_str(text).map_err(ProtocolError::InvalidJson)
}
