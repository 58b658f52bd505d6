//! Reconnection controller.
//!
//! A single task owns the session, the outbound queue, the subscription set,
//! the backoff schedule and both timers. Callers reach it only through
//! [`Command`]s, so "connected? send : queue" is decided in one place and at
//! most one reconnect deadline can exist at a time.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──ok──▶ Connected
//!    ▲                    │                  │
//!    │ disconnect /       │ err              │ closed / send failed /
//!    │ auth rejected      ▼                  │ keepalive timeout
//!    └─────────────── BackingOff ◀───────────┘
//! ```

use std::time::Duration;

use parley_core::{ChannelId, ClientMessage, ServerEvent, close};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};
use crate::events::{ClientEvent, CloseInfo, ConnectionStatus};
use crate::queue::{OutboundQueue, SubscriptionSet};
use crate::session::{Inbound, Session};

/// Stand-in deadline when keepalive is disabled.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Requests from [`ChatClient`](crate::ChatClient) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send(ClientMessage),
    Subscribe(ChannelId),
    Unsubscribe(ChannelId),
    Subscriptions(oneshot::Sender<Vec<ChannelId>>),
    Queued(oneshot::Sender<usize>),
}

enum Phase {
    Idle,
    Connecting { reconnect: bool },
    Connected(Box<Session>),
    BackingOff { deadline: Instant },
}

/// What an offline command asks the state machine to do.
enum Offline {
    Stay,
    Connect,
    Disconnect,
}

pub(crate) struct Controller {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: watch::Sender<ConnectionStatus>,
    queue: OutboundQueue,
    subscriptions: SubscriptionSet,
    /// Subscribes written on the current session and not yet answered.
    awaiting: SubscriptionSet,
    backoff: Backoff,
}

impl Controller {
    pub(crate) fn new(
        config: ClientConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<ClientEvent>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let backoff = config.backoff();
        Self {
            config,
            commands,
            events,
            status,
            queue: OutboundQueue::new(),
            subscriptions: SubscriptionSet::new(),
            awaiting: SubscriptionSet::new(),
            backoff,
        }
    }

    /// Drive the state machine until every handle is dropped.
    pub(crate) async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            let next = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting { reconnect } => self.connecting(reconnect).await,
                Phase::Connected(session) => self.connected(*session).await,
                Phase::BackingOff { deadline } => self.backing_off(deadline).await,
            };
            match next {
                Some(p) => phase = p,
                None => break,
            }
        }
        self.set_status(ConnectionStatus::Disconnected);
        debug!(queued = self.queue.len(), "client controller stopped");
    }

    async fn idle(&mut self) -> Option<Phase> {
        loop {
            let cmd = self.commands.recv().await?;
            match self.apply_offline(cmd) {
                Offline::Connect => return Some(Phase::Connecting { reconnect: false }),
                Offline::Disconnect => self.set_status(ConnectionStatus::Disconnected),
                Offline::Stay => {}
            }
        }
    }

    async fn connecting(&mut self, reconnect: bool) -> Option<Phase> {
        self.set_status(if reconnect {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        });
        debug!(reconnect, attempt = self.backoff.attempt(), "opening session");

        let config = self.config.clone();
        let attempt = Session::open(&config);
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                result = &mut attempt => return Some(self.on_open(result, reconnect).await),
                cmd = self.commands.recv() => {
                    if let Offline::Disconnect = self.apply_offline(cmd?) {
                        info!("connect attempt abandoned");
                        return Some(self.go_idle());
                    }
                }
            }
        }
    }

    async fn on_open(&mut self, result: Result<Session>, reconnect: bool) -> Phase {
        let mut session = match result {
            Ok(session) => session,
            Err(e) if e.is_auth_failure() => {
                warn!(error = %e, "hub rejected credentials");
                let info = match e {
                    ClientError::Closed { code, reason } => CloseInfo { code, reason },
                    other => CloseInfo::new(close::POLICY_VIOLATION, other.to_string()),
                };
                self.emit(ClientEvent::Closed(info));
                self.set_status(ConnectionStatus::AuthRequired);
                return Phase::Idle;
            }
            Err(e) => {
                warn!(error = %e, attempt = self.backoff.attempt() + 1, "connect attempt failed");
                return self.schedule_reconnect();
            }
        };
        info!(
            conn_id = %session.connection_id(),
            user_id = %session.user_id(),
            "connected"
        );
        self.backoff.reset();
        self.awaiting.clear();

        let replayed = match self.drain_queue(&mut session).await {
            Ok(n) => n,
            Err(e) => return self.lost(CloseInfo::abnormal(format!("replay failed: {e}"))),
        };
        let resubscribed = match self.resubscribe(&mut session).await {
            Ok(channels) => channels,
            Err(e) => return self.lost(CloseInfo::abnormal(format!("resubscribe failed: {e}"))),
        };

        self.emit(ClientEvent::Server(ServerEvent::Connected {
            connection_id: session.connection_id().clone(),
            user_id: session.user_id(),
        }));
        self.set_status(ConnectionStatus::Connected);
        if reconnect {
            info!(replayed, channels = resubscribed.len(), "session recovered");
            self.emit(ClientEvent::Recovered {
                replayed,
                resubscribed,
            });
        }
        Phase::Connected(Box::new(session))
    }

    async fn connected(&mut self, mut session: Session) -> Option<Phase> {
        let keepalive = self.config.keepalive_interval();
        let next_probe = || Instant::now() + keepalive.unwrap_or(FAR_FUTURE);
        let mut deadline = next_probe();
        let mut awaiting_pong = false;

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        session.close(close::NORMAL, "client dropped").await;
                        return None;
                    };
                    let outgoing = match cmd {
                        Command::Connect => None,
                        Command::Disconnect => {
                            info!("disconnecting");
                            session.close(close::NORMAL, "client disconnect").await;
                            self.emit(ClientEvent::Closed(CloseInfo::new(
                                close::NORMAL,
                                "client disconnect",
                            )));
                            return Some(self.go_idle());
                        }
                        Command::Send(message) => Some(message),
                        Command::Subscribe(channel_id) => {
                            let _ = self.subscriptions.insert(channel_id);
                            let _ = self.awaiting.insert(channel_id);
                            Some(ClientMessage::Subscribe { channel_id })
                        }
                        Command::Unsubscribe(channel_id) => {
                            let _ = self.subscriptions.remove(channel_id);
                            let _ = self.awaiting.remove(channel_id);
                            Some(ClientMessage::Unsubscribe { channel_id })
                        }
                        Command::Subscriptions(reply) => {
                            let _ = reply.send(self.subscriptions.to_vec());
                            None
                        }
                        Command::Queued(reply) => {
                            let _ = reply.send(self.queue.len());
                            None
                        }
                    };
                    if let Some(message) = outgoing {
                        if let Err(e) = session.send(&message).await {
                            return Some(self.send_failed(message, &e));
                        }
                    }
                }

                inbound = session.recv() => {
                    match inbound {
                        Inbound::Event(event) => {
                            self.settle_subscription(&event);
                            self.emit(ClientEvent::Server(event));
                        }
                        Inbound::Traffic => {}
                        Inbound::Closed(info) => return Some(self.lost(info)),
                    }
                    awaiting_pong = false;
                    deadline = next_probe();
                }

                () = tokio::time::sleep_until(deadline), if keepalive.is_some() => {
                    if awaiting_pong {
                        warn!(interval = ?keepalive, "no traffic within keepalive interval, closing session");
                        session.close(close::GOING_AWAY, "keepalive timeout").await;
                        return Some(self.lost(CloseInfo::abnormal("keepalive timeout")));
                    }
                    if let Err(e) = session.send(&ClientMessage::Ping).await {
                        return Some(self.lost(CloseInfo::abnormal(format!("keepalive failed: {e}"))));
                    }
                    awaiting_pong = true;
                    deadline = next_probe();
                }
            }
        }
    }

    async fn backing_off(&mut self, deadline: Instant) -> Option<Phase> {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match self.apply_offline(cmd?) {
                    Offline::Disconnect => {
                        info!("pending reconnect cancelled");
                        return Some(self.go_idle());
                    }
                    Offline::Connect => return Some(Phase::Connecting { reconnect: true }),
                    Offline::Stay => {}
                },
                () = &mut sleep => return Some(Phase::Connecting { reconnect: true }),
            }
        }
    }

    /// Handle a command while no session is connected.
    fn apply_offline(&mut self, cmd: Command) -> Offline {
        match cmd {
            Command::Connect => return Offline::Connect,
            Command::Disconnect => return Offline::Disconnect,
            Command::Send(message) => {
                debug!(kind = message.kind(), queued = self.queue.len() + 1, "queueing while offline");
                self.queue.push(message);
            }
            Command::Subscribe(channel_id) => {
                let _ = self.subscriptions.insert(channel_id);
            }
            Command::Unsubscribe(channel_id) => {
                let _ = self.subscriptions.remove(channel_id);
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.subscriptions.to_vec());
            }
            Command::Queued(reply) => {
                let _ = reply.send(self.queue.len());
            }
        }
        Offline::Stay
    }

    /// Replay queued messages oldest first. An entry leaves the queue only
    /// once it has been written.
    async fn drain_queue(&mut self, session: &mut Session) -> Result<usize> {
        let mut replayed = 0;
        while let Some(message) = self.queue.front() {
            match session.send(message).await {
                Ok(()) => replayed += 1,
                Err(ClientError::Protocol(e)) => {
                    warn!(error = %e, "dropping unencodable queued message");
                }
                Err(e) => return Err(e),
            }
            let _ = self.queue.pop();
        }
        Ok(replayed)
    }

    async fn resubscribe(&mut self, session: &mut Session) -> Result<Vec<ChannelId>> {
        let channels = self.subscriptions.to_vec();
        for &channel_id in &channels {
            session.send(&ClientMessage::Subscribe { channel_id }).await?;
            let _ = self.awaiting.insert(channel_id);
        }
        if !channels.is_empty() {
            debug!(count = channels.len(), "re-subscribed");
        }
        Ok(channels)
    }

    /// Match the hub's answer to an outstanding subscribe. The hub answers
    /// in request order, so a channel-scoped `error` while a subscribe is
    /// outstanding is its refusal. A refused channel leaves the set and is
    /// not retried on reconnect.
    fn settle_subscription(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Subscribed { channel_id } => {
                let _ = self.awaiting.remove(*channel_id);
            }
            ServerEvent::Error {
                channel_id: Some(channel_id),
                message,
            } => {
                if self.awaiting.remove(*channel_id) {
                    let _ = self.subscriptions.remove(*channel_id);
                    warn!(%channel_id, reason = %message, "subscription refused, dropping channel");
                }
            }
            _ => {}
        }
    }

    /// A write failed on a connected session. The message goes back on the
    /// queue and the session is treated as lost.
    fn send_failed(&mut self, message: ClientMessage, error: &ClientError) -> Phase {
        warn!(error = %error, kind = message.kind(), "send failed, closing session");
        match message {
            ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => {}
            other => self.queue.push(other),
        }
        self.lost(CloseInfo::abnormal(format!("send failed: {error}")))
    }

    /// The current session ended. Either go dormant or wait to retry.
    fn lost(&mut self, info: CloseInfo) -> Phase {
        self.emit(ClientEvent::Closed(info.clone()));
        if info.is_auth_required() {
            warn!(reason = %info.reason, "hub requires authentication, not reconnecting");
            self.set_status(ConnectionStatus::AuthRequired);
            return Phase::Idle;
        }
        info!(code = ?info.code, reason = %info.reason, "connection lost");
        self.schedule_reconnect()
    }

    fn schedule_reconnect(&mut self) -> Phase {
        let delay = self.backoff.next_delay();
        info!(?delay, attempt = self.backoff.attempt(), "reconnect scheduled");
        self.set_status(ConnectionStatus::Reconnecting);
        Phase::BackingOff {
            deadline: Instant::now() + delay,
        }
    }

    fn go_idle(&mut self) -> Phase {
        self.backoff.reset();
        self.set_status(ConnectionStatus::Disconnected);
        Phase::Idle
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "status changed");
            self.emit(ClientEvent::Status(status));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // The caller may drop the event stream and keep using the handle.
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
