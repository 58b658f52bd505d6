//! # parley-core
//!
//! Shared vocabulary for the Parley chat hub and its clients:
//!
//! - **Branded IDs**: `ConnectionId`, `ChannelId`, `UserId`, `MessageId`
//! - **Wire protocol**: `ClientMessage` / `ServerEvent` JSON frames
//! - **Close codes**: which closures are retryable
//! - **Errors**: `ProtocolError` via `thiserror`

#![deny(unsafe_code)]

pub mod close;
pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{ProtocolError, Result};
pub use ids::{ChannelId, ConnectionId, MessageId, UserId};
pub use protocol::{
    decode_client_message, decode_server_event, ClientMessage, ServerEvent, StoredMessage,
};
