//! Client configuration.

use std::fmt;
use std::time::Duration;

use parley_settings::ClientSettings;

use crate::backoff::Backoff;

/// Configuration for a [`ChatClient`](crate::ChatClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Hub WebSocket endpoint, e.g. `ws://127.0.0.1:8787/ws`.
    pub url: String,
    /// Session credential sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// Keepalive ping interval in milliseconds. `0` disables keepalive.
    pub keepalive_interval_ms: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Upper bound on upgrade plus acknowledgment. `0` waits forever.
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    /// Config for `url` with default timings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Attach a session credential.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Keepalive interval, or `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_ms > 0).then(|| Duration::from_millis(self.keepalive_interval_ms))
    }

    /// Connect timeout, or `None` when unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    /// A fresh backoff schedule for these timings.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        Self {
            url: s.url.clone(),
            token: None,
            keepalive_interval_ms: s.keepalive_interval_ms,
            reconnect_base_delay_ms: s.reconnect_base_delay_ms,
            reconnect_max_delay_ms: s.reconnect_max_delay_ms,
            connect_timeout_ms: s.connect_timeout_ms,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("keepalive_interval_ms", &self.keepalive_interval_ms)
            .field("reconnect_base_delay_ms", &self.reconnect_base_delay_ms)
            .field("reconnect_max_delay_ms", &self.reconnect_max_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}
