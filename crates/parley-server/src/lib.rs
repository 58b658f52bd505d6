//! # parley-server
//!
//! Axum HTTP + `WebSocket` hub for real-time chat delivery.
//!
//! - `WebSocket` gateway at `/ws`: credential check, connection registry,
//!   per-channel subscriptions and fan-out
//! - Chat messages are authorized and persisted through pluggable
//!   collaborators before any subscriber sees them
//! - Heartbeat probing reaps half-open sockets
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`, closing sessions with 1001

#![deny(unsafe_code)]

pub mod auth;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use collaborators::{
    Authorizer, ChannelDirectory, CollaboratorError, Collaborators, InMemoryMessageStore,
    MessageStore, SessionResolver, StaticSessions,
};
pub use config::ServerConfig;
pub use errors::HubError;
pub use server::ParleyServer;
pub use websocket::Hub;
