//! Public handle to a reconnecting chat session.

use parley_core::{ChannelId, ClientMessage, MessageId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, info_span};

use crate::config::ClientConfig;
use crate::controller::{Command, Controller};
use crate::errors::{ClientError, Result};
use crate::events::{ClientEvent, ConnectionStatus};

/// Cheap, cloneable handle to one logical chat session.
///
/// Every call is forwarded to a background controller task. Sends made while
/// not connected are queued and replayed, in order, after the next successful
/// connection. Dropping the last handle closes the connection and stops the
/// task.
#[derive(Clone, Debug)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ChatClient {
    /// Start the controller task. The client stays dormant until
    /// [`connect`](Self::connect).
    ///
    /// The event stream is unbounded: every hub event reaches the caller,
    /// however far behind it falls.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let span = info_span!("parley_client", url = %config.url);
        let controller = Controller::new(config, cmd_rx, event_tx, status_tx);
        drop(tokio::spawn(controller.run().instrument(span)));

        (
            Self {
                commands: cmd_tx,
                status: status_rx,
            },
            event_rx,
        )
    }

    /// Open a connection, or retry immediately if one is pending.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Send a message, or queue it until the next connection.
    ///
    /// `subscribe` and `unsubscribe` update the subscription set instead of
    /// being queued, so they are replayed by resubscription.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Subscribe { channel_id } => self.subscribe(channel_id),
            ClientMessage::Unsubscribe { channel_id } => self.unsubscribe(channel_id),
            other => self.command(Command::Send(other)),
        }
    }

    /// Post a top-level chat message.
    pub fn post(&self, channel_id: ChannelId, content: impl Into<String>) -> Result<()> {
        self.command(Command::Send(ClientMessage::chat(channel_id, content)))
    }

    /// Post a threaded reply.
    pub fn reply(
        &self,
        channel_id: ChannelId,
        parent_id: MessageId,
        content: impl Into<String>,
    ) -> Result<()> {
        self.command(Command::Send(ClientMessage::Message {
            channel_id,
            content: content.into(),
            parent_id: Some(parent_id),
        }))
    }

    /// Signal that the user is typing.
    pub fn typing(&self, channel_id: ChannelId) -> Result<()> {
        self.command(Command::Send(ClientMessage::Typing { channel_id }))
    }

    /// Add a channel to the subscription set and subscribe if connected.
    ///
    /// If the hub refuses the channel it leaves the set again, and the
    /// refusal arrives as a channel-scoped [`ServerEvent::Error`].
    ///
    /// [`ServerEvent::Error`]: parley_core::ServerEvent::Error
    pub fn subscribe(&self, channel_id: ChannelId) -> Result<()> {
        self.command(Command::Subscribe(channel_id))
    }

    /// Remove a channel from the subscription set and unsubscribe if connected.
    pub fn unsubscribe(&self, channel_id: ChannelId) -> Result<()> {
        self.command(Command::Unsubscribe(channel_id))
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Resolve once the status equals `target`.
    pub async fn wait_for_status(&self, target: ConnectionStatus) -> Result<()> {
        let mut rx = self.status.clone();
        let _ = rx
            .wait_for(|status| *status == target)
            .await
            .map_err(|_| ClientError::Stopped)?;
        Ok(())
    }

    /// Channels in the subscription set, in id order.
    pub async fn subscriptions(&self) -> Result<Vec<ChannelId>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscriptions(tx))?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Messages waiting for the next connection.
    pub async fn queued(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Queued(tx))?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.commands.send(cmd).map_err(|_| ClientError::Stopped)
    }
}
