//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Work item for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized [`parley_core::ServerEvent`]. Shared across broadcast recipients.
    Frame(Arc<str>),
    /// Transport-level heartbeat probe.
    Ping,
}

/// Result of enqueueing onto a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the writer queue.
    Queued,
    /// Queue full; the item was dropped.
    Full,
    /// The writer is gone; the connection is being torn down.
    Closed,
}

/// Close frame the writer sends when the connection is shut from the hub side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// A registered WebSocket client.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Identity bound at upgrade time.
    pub user_id: UserId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// Cancelled when the hub tears the connection down.
    cancel: CancellationToken,
    /// Close frame to send on hub-initiated teardown.
    close_frame: Mutex<Option<CloseFrame>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown any sign of life since the last probe.
    pub is_alive: AtomicBool,
    /// Count of messages dropped due to a full channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            user_id,
            tx,
            cancel: CancellationToken::new(),
            close_frame: Mutex::new(None),
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue an item for the writer task without waiting.
    pub fn send(&self, item: Outbound) -> SendOutcome {
        match self.tx.try_send(item) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Enqueue a serialized frame.
    pub fn send_text(&self, text: Arc<str>) -> SendOutcome {
        self.send(Outbound::Frame(text))
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any other traffic received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the session to close the socket with `code`.
    ///
    /// Only the first close request sets the frame. Later calls are no-ops.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_none() {
                *frame = Some(CloseFrame {
                    code,
                    reason: reason.into(),
                });
            }
        }
        self.cancel.cancel();
    }

    /// Close frame requested via [`close`](Self::close), if any.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.close_frame.lock().clone()
    }

    /// Token cancelled once teardown starts.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether teardown has started.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::close;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), UserId::new(7), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.user_id, UserId::new(7));
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert!(!conn.is_closing());
    }

    #[tokio::test]
    async fn send_frame_success() {
        let (conn, mut rx) = make_connection(4);
        assert_eq!(conn.send_text(Arc::from("hello")), SendOutcome::Queued);
        assert_eq!(rx.recv().await, Some(Outbound::Frame(Arc::from("hello"))));
    }

    #[test]
    fn send_to_full_channel_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert_eq!(conn.send(Outbound::Ping), SendOutcome::Queued);
        assert_eq!(conn.send(Outbound::Ping), SendOutcome::Full);
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_to_closed_channel_reports_closed() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert_eq!(conn.send(Outbound::Ping), SendOutcome::Closed);
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn check_alive_is_two_strike() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn first_close_wins() {
        let (conn, _rx) = make_connection(4);
        conn.close(close::GOING_AWAY, "heartbeat timeout");
        conn.close(close::TRY_AGAIN_LATER, "slow consumer");
        assert!(conn.is_closing());
        assert_eq!(
            conn.close_frame(),
            Some(CloseFrame {
                code: close::GOING_AWAY,
                reason: "heartbeat timeout".into()
            })
        );
    }
}
