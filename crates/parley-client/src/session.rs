//! One physical connection to the hub.
//!
//! A [`Session`] exists only once the upgrade succeeded and the hub sent its
//! `connected` acknowledgment. It never reconnects; the controller replaces
//! it with a fresh one.

use futures::{SinkExt, StreamExt};
use parley_core::{ClientMessage, ConnectionId, ServerEvent, UserId, decode_server_event};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::events::CloseInfo;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What one read from the socket produced.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded hub event.
    Event(ServerEvent),
    /// A frame that proves liveness but carries no event.
    Traffic,
    /// The connection is over.
    Closed(CloseInfo),
}

/// An established, acknowledged connection.
#[derive(Debug)]
pub struct Session {
    stream: WsStream,
    connection_id: ConnectionId,
    user_id: UserId,
}

impl Session {
    /// Upgrade and wait for the hub's `connected` acknowledgment, bounded by
    /// the configured connect timeout.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let request = upgrade_request(config)?;
        let handshake = async {
            let (mut stream, _response) = connect_async(request).await?;
            let (connection_id, user_id) = await_ack(&mut stream).await?;
            Ok(Self {
                stream,
                connection_id,
                user_id,
            })
        };
        match config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| ClientError::Timeout(limit))?,
            None => handshake.await,
        }
    }

    /// Id the hub assigned to this connection.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Identity the hub bound to this connection.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Write one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    /// Read the next frame. Cancel-safe.
    pub async fn recv(&mut self) -> Inbound {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => decode(text.as_str()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => decode(text),
                Err(_) => {
                    warn!("ignoring non-UTF-8 binary frame");
                    Inbound::Traffic
                }
            },
            Some(Ok(Message::Close(frame))) => Inbound::Closed(close_info(frame)),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Inbound::Traffic,
            Some(Err(e)) => Inbound::Closed(CloseInfo::abnormal(e.to_string())),
            None => Inbound::Closed(CloseInfo::abnormal("connection reset")),
        }
    }

    /// Send a close frame and drop the connection.
    pub async fn close(mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, code, "failed to send close frame");
        }
    }
}

fn upgrade_request(config: &ClientConfig) -> Result<Request> {
    let mut request =
        config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
    if let Some(token) = config.token.as_deref() {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::InvalidCredential)?;
        let _ = request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// Read until the `connected` acknowledgment or a close.
async fn await_ack(stream: &mut WsStream) -> Result<(ConnectionId, UserId)> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => {
                return match decode_server_event(text.as_str()) {
                    Ok(ServerEvent::Connected {
                        connection_id,
                        user_id,
                    }) => Ok((connection_id, user_id)),
                    Ok(other) => Err(ClientError::Handshake(format!(
                        "expected connected, got {}",
                        other.kind()
                    ))),
                    Err(e) => Err(ClientError::Handshake(e.to_string())),
                };
            }
            Message::Close(frame) => {
                let info = close_info(frame);
                return Err(ClientError::Closed {
                    code: info.code,
                    reason: info.reason,
                });
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Err(ClientError::Closed {
        code: None,
        reason: "connection ended before acknowledgment".into(),
    })
}

fn decode(text: &str) -> Inbound {
    match decode_server_event(text) {
        Ok(event) => Inbound::Event(event),
        Err(e) => {
            warn!(error = %e, "ignoring undecodable frame");
            Inbound::Traffic
        }
    }
}

fn close_info(frame: Option<CloseFrame>) -> CloseInfo {
    match frame {
        Some(frame) => CloseInfo::new(u16::from(frame.code), frame.reason.as_str()),
        None => CloseInfo::abnormal("closed without a code"),
    }
}
