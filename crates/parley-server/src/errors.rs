//! Hub error types.

use parley_core::ConnectionId;
use thiserror::Error;

/// Errors raised by registry operations.
///
/// None of these are fatal to the hub. They describe why one operation on one
/// connection could not proceed.
#[derive(Debug, Error)]
pub enum HubError {
    /// The connection is not (or no longer) registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    /// The registry is full.
    #[error("connection limit reached ({max})")]
    AtCapacity {
        /// Configured cap.
        max: usize,
    },
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
