//! WebSocket hub: connection registry, channel fan-out, heartbeat, and the
//! per-socket session loop.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;

pub use broadcast::{BroadcastReport, HeartbeatSweep, Hub, HubLimits};
pub use connection::{ClientConnection, Outbound, SendOutcome};
