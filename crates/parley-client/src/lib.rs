//! # parley-client
//!
//! Reconnecting client for the Parley hub.
//!
//! - **Session**: one acknowledged WebSocket connection
//! - **Controller**: backoff reconnects, outbound queue replay, resubscription
//! - **`ChatClient`**: cloneable handle that talks to the controller task
//!
//! ```text
//! let (client, mut events) = ChatClient::spawn(ClientConfig::new(url).with_token(token));
//! client.connect()?;
//! client.subscribe(ChannelId::new(42))?;
//! client.post(ChannelId::new(42), "hi")?;
//! ```

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod config;
mod controller;
pub mod errors;
pub mod events;
pub mod queue;
pub mod session;

pub use backoff::Backoff;
pub use client::ChatClient;
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use events::{ClientEvent, CloseInfo, ConnectionStatus};
pub use queue::{OutboundQueue, SubscriptionSet};
