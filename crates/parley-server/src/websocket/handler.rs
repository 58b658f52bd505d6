//! Inbound frame dispatch: decode a client frame and route it to the hub.

use metrics::counter;
use parley_core::{ClientMessage, ConnectionId, ProtocolError, ServerEvent, decode_client_message};
use tracing::{debug, instrument, warn};

use super::broadcast::Hub;
use crate::errors::Result;
use crate::metrics as names;

/// Decode and dispatch one text frame from `conn_id`.
///
/// Malformed frames are answered with an `error` event and otherwise
/// ignored; the connection stays open. An `Err` means the connection is no
/// longer registered and the session should end.
#[instrument(skip_all, fields(conn_id = %conn_id, kind))]
pub async fn handle_text(hub: &Hub, conn_id: &ConnectionId, text: &str) -> Result<()> {
    let message = match decode_client_message(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "invalid client frame");
            counter!(names::WS_PROTOCOL_ERRORS_TOTAL, "kind" => error_kind(&e)).increment(1);
            let _ = hub.send_to(conn_id, &ServerEvent::error(e.to_string()))?;
            return Ok(());
        }
    };
    let _ = tracing::Span::current().record("kind", message.kind());
    dispatch(hub, conn_id, message).await
}

/// Route a decoded message to the matching hub operation.
pub async fn dispatch(hub: &Hub, conn_id: &ConnectionId, message: ClientMessage) -> Result<()> {
    debug!(kind = message.kind(), "dispatching client message");
    match message {
        ClientMessage::Subscribe { channel_id } => {
            let _ = hub.subscribe(conn_id, channel_id).await?;
        }
        ClientMessage::Unsubscribe { channel_id } => hub.unsubscribe(conn_id, channel_id)?,
        ClientMessage::Message {
            channel_id,
            content,
            parent_id,
        } => {
            let _ = hub
                .handle_chat_message(conn_id, channel_id, &content, parent_id)
                .await?;
        }
        ClientMessage::Typing { channel_id } => {
            let _ = hub.handle_typing(conn_id, channel_id)?;
        }
        ClientMessage::Ping => {
            let _ = hub.send_to(conn_id, &ServerEvent::Pong)?;
        }
    }
    Ok(())
}

fn error_kind(e: &ProtocolError) -> &'static str {
    match e {
        ProtocolError::InvalidJson(_) => "invalid_json",
        ProtocolError::NotAnObject => "not_an_object",
        ProtocolError::MissingType => "missing_type",
        ProtocolError::UnknownType(_) => "unknown_type",
        ProtocolError::InvalidPayload { .. } => "invalid_payload",
        ProtocolError::Encode(_) => "encode",
    }
}
