//! Client error types.

use std::time::Duration;

use parley_core::{ProtocolError, close};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while connecting to or talking with the hub.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The configured URL could not be turned into an upgrade request.
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The token cannot be carried in an HTTP header.
    #[error("credential is not a valid header value")]
    InvalidCredential,
    /// Transport or WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
    /// The upgrade was refused with 401 or 403.
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),
    /// Connecting plus the acknowledgment took longer than allowed.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// The server closed the socket before or during the handshake.
    #[error("server closed the connection (code {code:?}): {reason}")]
    Closed {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The server answered with something other than the `connected` ack.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Encoding an outbound frame failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The controller task is gone.
    #[error("client has stopped")]
    Stopped,
}

impl ClientError {
    /// Whether retrying cannot help until the user signs in again.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Closed { code, .. } => {
                close::disposition(*code) == close::CloseDisposition::AuthRequired
            }
            _ => false,
        }
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Http(response)
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Self::Unauthorized(response.status().as_u16())
            }
            _ => Self::WebSocket(Box::new(err)),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
