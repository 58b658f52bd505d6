//! WebSocket close codes and how the client reacts to them.
//!
//! Only [`POLICY_VIOLATION`] is terminal: it means the upgrade carried no
//! valid identity and retrying cannot succeed. Every other code is transient.

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint going away (server shutdown, client navigation).
pub const GOING_AWAY: u16 = 1001;
/// No close frame was received. Never sent on the wire.
pub const ABNORMAL: u16 = 1006;
/// Authentication required. Do not auto-reconnect.
pub const POLICY_VIOLATION: u16 = 1008;
/// Server hit an unexpected condition.
pub const INTERNAL_ERROR: u16 = 1011;
/// Server is at capacity.
pub const TRY_AGAIN_LATER: u16 = 1013;

/// What the client should do after a close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Transient: schedule a reconnect.
    Reconnect,
    /// Hard authentication failure: surface to the user, never retry.
    AuthRequired,
}

/// Classify a close code. A missing code is an abnormal closure.
pub fn disposition(code: Option<u16>) -> CloseDisposition {
    match code {
        Some(POLICY_VIOLATION) => CloseDisposition::AuthRequired,
        _ => CloseDisposition::Reconnect,
    }
}
