//! What the client reports to its caller.

use std::fmt;

use parley_core::{ChannelId, ServerEvent, close};

/// Connection status as the caller should present it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dormant: never connected, or `disconnect()` was called.
    #[default]
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Handshake complete; sends go straight to the wire.
    Connected,
    /// Lost the connection and retrying on a backoff schedule.
    Reconnecting,
    /// The hub rejected our credential. No further attempts are made.
    AuthRequired,
}

impl ConnectionStatus {
    /// Whether sends are transmitted immediately.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Whether the client will not connect again without a `connect()` call.
    pub fn is_dormant(self) -> bool {
        matches!(self, Self::Disconnected | Self::AuthRequired)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::AuthRequired => "auth_required",
        };
        f.write_str(s)
    }
}

/// How a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, `None` when the transport dropped without a close frame.
    pub code: Option<u16>,
    /// Close reason or a local description of the failure.
    pub reason: String,
}

impl CloseInfo {
    /// Close with a code.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Abnormal closure with a local description.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    /// Whether the close must not be retried.
    pub fn is_auth_required(&self) -> bool {
        close::disposition(self.code) == close::CloseDisposition::AuthRequired
    }
}

/// One item on the client's event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The status changed.
    Status(ConnectionStatus),
    /// The current connection ended.
    Closed(CloseInfo),
    /// An event pushed by the hub.
    Server(ServerEvent),
    /// A reconnect finished: the queue was replayed and every channel in the
    /// subscription set was re-requested.
    Recovered {
        /// Messages replayed from the outbound queue.
        replayed: usize,
        /// Channels re-subscribed, in id order.
        resubscribed: Vec<ChannelId>,
    },
}
