//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("frame must be a JSON object")]
    NotAnObject,
    /// The object has no string `type` tag.
    #[error("missing message type")]
    MissingType,
    /// The `type` tag names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// A known message type with missing or mistyped fields.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The message type that failed.
        kind: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Serializing an outbound frame failed.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
