//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::{ServerEvent, UserId, close};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::broadcast::Hub;
use super::connection::{ClientConnection, Outbound};
use super::handler::handle_text;
use crate::metrics as names;

/// How long the session waits for its writer to flush a close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a WebSocket session for an authenticated client.
///
/// 1. Registers with the hub (closing with 1013 when full)
/// 2. Sends a `connected` event with the new connection id
/// 3. Dispatches incoming text frames to the hub
/// 4. Forwards queued events and heartbeat probes through one writer task
/// 5. Deregisters on disconnect, hub-initiated close or write failure
#[instrument(skip_all, fields(user_id = %user_id, conn_id))]
pub async fn run_ws_session(socket: WebSocket, hub: Arc<Hub>, user_id: UserId) {
    let (conn, outbound_rx) = match hub.register(user_id) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "refusing connection");
            counter!(names::WS_AUTH_REJECTIONS_TOTAL, "reason" => "capacity").increment(1);
            close_socket(socket, close::TRY_AGAIN_LATER, "server at capacity").await;
            return;
        }
    };
    let _ = tracing::Span::current().record("conn_id", conn.id.as_str());

    info!("client connected");
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(ws_tx, outbound_rx, conn.clone()));

    let connected = ServerEvent::Connected {
        connection_id: conn.id.clone(),
        user_id,
    };
    let _ = hub.send_to(&conn.id, &connected);

    loop {
        let next = tokio::select! {
            () = conn.cancelled().cancelled() => {
                debug!("connection closed by hub");
                break;
            }
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };

        conn.mark_alive();
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_owned())
                } else {
                    let _ = hub.send_to(
                        &conn.id,
                        &ServerEvent::error("binary frames must contain UTF-8 JSON"),
                    );
                    None
                }
            }
            Message::Close(frame) => {
                info!(code = frame.as_ref().map(|f| f.code), "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };
        let Some(text) = text else { continue };

        if let Err(e) = handle_text(&hub, &conn.id, &text).await {
            debug!(error = %e, "connection left the registry mid-dispatch");
            break;
        }
    }

    // Clean up
    let _ = hub.deregister(&conn.id);
    conn.cancelled().cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("writer did not finish in time");
    }

    info!(dropped = conn.drop_count(), age = ?conn.age(), "client disconnected");
    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(names::WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
}

/// Drain the outbound queue into the socket until the connection is torn down.
///
/// A failed write cancels the connection so the read loop ends too.
async fn write_loop<S>(
    mut ws_tx: S,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<ClientConnection>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let item = tokio::select! {
            biased;
            () = conn.cancelled().cancelled() => break,
            item = rx.recv() => item,
        };
        let message = match item {
            Some(Outbound::Frame(text)) => Message::Text(String::from(&*text).into()),
            Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
            None => break,
        };
        if let Err(e) = ws_tx.send(message).await {
            warn!(conn_id = %conn.id, error = %e, "websocket write failed, closing connection");
            conn.cancelled().cancel();
            return;
        }
    }

    if let Some(frame) = conn.close_frame() {
        debug!(conn_id = %conn.id, code = frame.code, reason = %frame.reason, "sending close frame");
        let close = Message::Close(Some(CloseFrame {
            code: frame.code,
            reason: frame.reason.into(),
        }));
        let _ = ws_tx.send(close).await;
    }
    let _ = ws_tx.close().await;
}

/// Close an unsplit socket with a code and reason.
pub async fn close_socket(mut socket: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, code, "failed to send close frame");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use parley_core::ConnectionId;

    fn make_connection() -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), UserId::new(1), tx);
        (Arc::new(conn), rx)
    }

    /// A socket whose peer has gone away: every write fails.
    fn broken_socket(
        attempts: Arc<AtomicUsize>,
    ) -> impl Sink<Message, Error = std::io::Error> + Unpin {
        Box::pin(futures::sink::unfold((), move |(), _: Message| {
            let _ = attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer reset")) }
        }))
    }

    #[tokio::test]
    async fn failed_write_cancels_connection() {
        let (conn, rx) = make_connection();
        let _ = conn.send_text(Arc::from(r#"{"type":"pong"}"#));
        let _ = conn.send_text(Arc::from(r#"{"type":"pong"}"#));
        let attempts = Arc::new(AtomicUsize::new(0));

        tokio::time::timeout(
            Duration::from_secs(1),
            write_loop(broken_socket(attempts.clone()), rx, conn.clone()),
        )
        .await
        .unwrap();

        assert!(conn.is_closing());
        // Gave up on the first failure instead of writing the rest.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hub_close_writes_close_frame() {
        let (conn, rx) = make_connection();
        conn.close(close::GOING_AWAY, "server shutting down");
        let (sink, written) = futures::channel::mpsc::unbounded();

        write_loop(sink, rx, conn).await;

        let frames: Vec<Message> = written.collect().await;
        assert_eq!(frames.len(), 1);
        let Message::Close(Some(frame)) = &frames[0] else {
            panic!("expected close frame, got {:?}", frames[0]);
        };
        assert_eq!(frame.code, close::GOING_AWAY);
        assert_eq!(frame.reason.as_str(), "server shutting down");
    }
}
