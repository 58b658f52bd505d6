//! Connection registry and channel fan-out.
//!
//! One lock guards both the connection table and the per-channel reverse
//! index. Broadcasts enqueue while holding the read lock and every mutation
//! takes the write lock, so once [`Hub::deregister`] returns no broadcast can
//! still be writing to the removed connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use parley_core::close;
use parley_core::{ChannelId, ConnectionId, MessageId, ServerEvent, StoredMessage, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Outbound, SendOutcome};
use crate::collaborators::{Authorizer, MessageStore};
use crate::errors::{HubError, Result};
use crate::metrics as names;

/// Error text for a denied or unknown channel. Does not reveal which.
const ACCESS_DENIED: &str = "channel not found or access denied";

/// Capacity limits applied by the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubLimits {
    /// Registration cap.
    pub max_connections: usize,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Lifetime drops after which a connection is evicted.
    pub max_dropped_messages: u64,
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            send_queue_capacity: 256,
            max_dropped_messages: 100,
        }
    }
}

/// Per-call delivery tally returned by [`Hub::broadcast`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the event was queued for.
    pub delivered: usize,
    /// Subscribers whose queue was full or closed.
    pub dropped: usize,
    /// Subscribers torn down as a result of this call.
    pub evicted: usize,
}

/// Outcome of one heartbeat pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatSweep {
    /// Connections that were sent a fresh probe.
    pub probed: usize,
    /// Connections deregistered for missing the previous probe.
    pub reaped: Vec<ConnectionId>,
}

struct Entry {
    conn: Arc<ClientConnection>,
    channels: HashSet<ChannelId>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Entry>,
    channels: HashMap<ChannelId, HashSet<ConnectionId>>,
}

impl Registry {
    fn unindex(&mut self, id: &ConnectionId, channel_id: ChannelId) {
        if let Some(subscribers) = self.channels.get_mut(&channel_id) {
            let _ = subscribers.remove(id);
            if subscribers.is_empty() {
                let _ = self.channels.remove(&channel_id);
            }
        }
    }
}

/// The hub: registry of live connections plus the channel broadcast router.
pub struct Hub {
    registry: RwLock<Registry>,
    authorizer: Arc<dyn Authorizer>,
    store: Arc<dyn MessageStore>,
    limits: HubLimits,
}

impl Hub {
    /// Create an empty hub.
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        store: Arc<dyn MessageStore>,
        limits: HubLimits,
    ) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            authorizer,
            store,
            limits,
        }
    }

    /// Limits this hub enforces.
    pub fn limits(&self) -> HubLimits {
        self.limits
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Admit an authenticated connection.
    ///
    /// Returns the connection and the receiving end of its outbound queue,
    /// which the session's writer task drains.
    pub fn register(
        &self,
        user_id: UserId,
    ) -> Result<(Arc<ClientConnection>, mpsc::Receiver<Outbound>)> {
        let mut registry = self.registry.write();
        if registry.connections.len() >= self.limits.max_connections {
            return Err(HubError::AtCapacity {
                max: self.limits.max_connections,
            });
        }
        let (tx, rx) = mpsc::channel(self.limits.send_queue_capacity);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), user_id, tx));
        let entry = Entry {
            conn: conn.clone(),
            channels: HashSet::new(),
        };
        let _ = registry.connections.insert(conn.id.clone(), entry);
        debug!(conn_id = %conn.id, user_id = %user_id, "connection registered");
        Ok((conn, rx))
    }

    /// Remove a connection from the registry and from every channel.
    ///
    /// Idempotent. Returns the removed connection, if it was present.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let mut registry = self.registry.write();
        let entry = registry.connections.remove(id)?;
        for channel_id in &entry.channels {
            registry.unindex(id, *channel_id);
        }
        debug!(conn_id = %id, channels = entry.channels.len(), "connection deregistered");
        Some(entry.conn)
    }

    /// Deregister a connection and ask its session to close the socket.
    pub fn evict(&self, id: &ConnectionId, code: u16, reason: &str) -> bool {
        match self.deregister(id) {
            Some(conn) => {
                conn.close(code, reason);
                true
            }
            None => false,
        }
    }

    /// Close every connection, e.g. on shutdown.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let conns = self.snapshot();
        for conn in &conns {
            conn.close(code, reason);
        }
        conns.len()
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe a connection to a channel after checking authorization.
    ///
    /// Acknowledges with `subscribed` on success and `error` on denial, in
    /// both cases to this connection only. Returns whether access was granted.
    pub async fn subscribe(&self, id: &ConnectionId, channel_id: ChannelId) -> Result<bool> {
        let conn = self.connection(id)?;
        if !self.is_authorized(&conn, channel_id).await {
            let _ = reply(&conn, &ServerEvent::channel_error(channel_id, ACCESS_DENIED));
            return Ok(false);
        }
        {
            let mut guard = self.registry.write();
            let registry = &mut *guard;
            let Some(entry) = registry.connections.get_mut(id) else {
                return Err(HubError::UnknownConnection(id.clone()));
            };
            let _ = entry.channels.insert(channel_id);
            let _ = registry
                .channels
                .entry(channel_id)
                .or_default()
                .insert(id.clone());
        }
        debug!(conn_id = %id, channel_id = %channel_id, "subscribed");
        let _ = reply(&conn, &ServerEvent::Subscribed { channel_id });
        Ok(true)
    }

    /// Remove a subscription. Always acknowledged, even if absent.
    pub fn unsubscribe(&self, id: &ConnectionId, channel_id: ChannelId) -> Result<()> {
        let conn = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.connections.get_mut(id) else {
                return Err(HubError::UnknownConnection(id.clone()));
            };
            let _ = entry.channels.remove(&channel_id);
            let conn = entry.conn.clone();
            registry.unindex(id, channel_id);
            conn
        };
        debug!(conn_id = %id, channel_id = %channel_id, "unsubscribed");
        let _ = reply(&conn, &ServerEvent::Unsubscribed { channel_id });
        Ok(())
    }

    // ── Fan-out ─────────────────────────────────────────────────────

    /// Queue `event` for every connection subscribed to `channel_id`.
    ///
    /// Best-effort per recipient. A full or closed queue on one connection
    /// never affects the others. Connections whose writer is gone, or that
    /// have dropped too many messages, are evicted after the pass.
    pub fn broadcast(&self, channel_id: ChannelId, event: &ServerEvent) -> BroadcastReport {
        let text: Arc<str> = match event.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "failed to serialize event");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut slow = Vec::new();
        let mut gone = Vec::new();
        {
            let registry = self.registry.read();
            let Some(subscribers) = registry.channels.get(&channel_id) else {
                return report;
            };
            for id in subscribers {
                let Some(entry) = registry.connections.get(id) else {
                    continue;
                };
                let conn = &entry.conn;
                if conn.is_closing() {
                    continue;
                }
                match conn.send_text(text.clone()) {
                    SendOutcome::Queued => report.delivered += 1,
                    SendOutcome::Full => {
                        report.dropped += 1;
                        counter!(names::WS_BROADCAST_DROPS_TOTAL).increment(1);
                        if conn.drop_count() >= self.limits.max_dropped_messages {
                            slow.push(id.clone());
                        }
                    }
                    SendOutcome::Closed => {
                        report.dropped += 1;
                        counter!(names::WS_BROADCAST_DROPS_TOTAL).increment(1);
                        gone.push(id.clone());
                    }
                }
            }
        }

        for id in &slow {
            if self.evict(id, close::TRY_AGAIN_LATER, "slow consumer") {
                warn!(conn_id = %id, "evicted slow consumer");
                counter!(names::WS_SLOW_CONSUMER_EVICTIONS_TOTAL).increment(1);
                report.evicted += 1;
            }
        }
        for id in &gone {
            if self.evict(id, close::GOING_AWAY, "connection closed") {
                info!(conn_id = %id, "dropped connection with closed writer");
                report.evicted += 1;
            }
        }

        debug!(
            kind = event.kind(),
            channel_id = %channel_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "broadcast event to channel"
        );
        report
    }

    /// Send an event to one connection.
    pub fn send_to(&self, id: &ConnectionId, event: &ServerEvent) -> Result<SendOutcome> {
        let conn = self.connection(id)?;
        Ok(reply(&conn, event))
    }

    // ── Inbound events ──────────────────────────────────────────────

    /// Authorize, persist, then broadcast a chat message.
    ///
    /// Authorization is re-checked on every message. Denials and store
    /// failures are reported to the sender only and nothing is broadcast.
    pub async fn handle_chat_message(
        &self,
        id: &ConnectionId,
        channel_id: ChannelId,
        content: &str,
        parent_id: Option<MessageId>,
    ) -> Result<Option<StoredMessage>> {
        let conn = self.connection(id)?;

        if content.trim().is_empty() {
            counter!(names::CHAT_MESSAGE_ERRORS_TOTAL, "reason" => "empty").increment(1);
            let _ = reply(
                &conn,
                &ServerEvent::channel_error(channel_id, "message content is empty"),
            );
            return Ok(None);
        }

        if !self.is_authorized(&conn, channel_id).await {
            counter!(names::CHAT_MESSAGE_ERRORS_TOTAL, "reason" => "denied").increment(1);
            let _ = reply(&conn, &ServerEvent::channel_error(channel_id, ACCESS_DENIED));
            return Ok(None);
        }

        let record = match self
            .store
            .persist_message(channel_id, conn.user_id, content, parent_id)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(conn_id = %id, channel_id = %channel_id, error = %e, "failed to save message");
                counter!(names::CHAT_MESSAGE_ERRORS_TOTAL, "reason" => "store").increment(1);
                let _ = reply(
                    &conn,
                    &ServerEvent::channel_error(channel_id, "failed to save message"),
                );
                return Ok(None);
            }
        };
        counter!(names::CHAT_MESSAGES_PERSISTED_TOTAL).increment(1);

        let event = ServerEvent::Message {
            channel_id,
            message: record.clone(),
        };
        let _ = self.broadcast(channel_id, &event);
        Ok(Some(record))
    }

    /// Broadcast a typing indicator from a subscribed connection.
    ///
    /// Only subscription is checked. Returns whether the event went out.
    pub fn handle_typing(&self, id: &ConnectionId, channel_id: ChannelId) -> Result<bool> {
        let conn = self.connection(id)?;
        if !self.is_subscribed(id, channel_id) {
            let _ = reply(
                &conn,
                &ServerEvent::channel_error(channel_id, "not subscribed to channel"),
            );
            return Ok(false);
        }
        let event = ServerEvent::Typing {
            channel_id,
            user_id: conn.user_id,
        };
        let _ = self.broadcast(channel_id, &event);
        Ok(true)
    }

    // ── Heartbeat ───────────────────────────────────────────────────

    /// One heartbeat pass over every registered connection.
    ///
    /// A connection still marked not-alive from the previous pass is reaped.
    /// Every other connection is marked not-alive and sent a probe.
    pub fn sweep_heartbeat(&self) -> HeartbeatSweep {
        let mut sweep = HeartbeatSweep::default();
        for conn in self.snapshot() {
            if conn.check_alive() {
                match conn.send(Outbound::Ping) {
                    SendOutcome::Queued | SendOutcome::Full => sweep.probed += 1,
                    SendOutcome::Closed => {
                        let _ = self.evict(&conn.id, close::GOING_AWAY, "connection closed");
                    }
                }
            } else if self.evict(&conn.id, close::GOING_AWAY, "heartbeat timeout") {
                info!(conn_id = %conn.id, "reaped unresponsive connection");
                counter!(names::WS_HEARTBEAT_REAPED_TOTAL).increment(1);
                sweep.reaped.push(conn.id.clone());
            }
        }
        sweep
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Look up a live connection.
    pub fn connection(&self, id: &ConnectionId) -> Result<Arc<ClientConnection>> {
        self.registry
            .read()
            .connections
            .get(id)
            .map(|entry| entry.conn.clone())
            .ok_or_else(|| HubError::UnknownConnection(id.clone()))
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.read().connections.len()
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.registry.read().channels.len()
    }

    /// Number of connections subscribed to a channel.
    pub fn subscriber_count(&self, channel_id: ChannelId) -> usize {
        self.registry
            .read()
            .channels
            .get(&channel_id)
            .map_or(0, HashSet::len)
    }

    /// Whether a connection is subscribed to a channel.
    pub fn is_subscribed(&self, id: &ConnectionId, channel_id: ChannelId) -> bool {
        self.registry
            .read()
            .connections
            .get(id)
            .is_some_and(|entry| entry.channels.contains(&channel_id))
    }

    /// Channels a connection is subscribed to, in ascending order.
    pub fn subscriptions(&self, id: &ConnectionId) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .registry
            .read()
            .connections
            .get(id)
            .map(|entry| entry.channels.iter().copied().collect())
            .unwrap_or_default();
        channels.sort_unstable();
        channels
    }

    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.registry
            .read()
            .connections
            .values()
            .map(|entry| entry.conn.clone())
            .collect()
    }

    async fn is_authorized(&self, conn: &ClientConnection, channel_id: ChannelId) -> bool {
        match self.authorizer.authorize(conn.user_id, channel_id).await {
            Ok(allowed) => {
                if !allowed {
                    debug!(conn_id = %conn.id, channel_id = %channel_id, "access denied");
                }
                allowed
            }
            Err(e) => {
                warn!(conn_id = %conn.id, channel_id = %channel_id, error = %e, "authorization check failed");
                false
            }
        }
    }
}

/// Serialize and enqueue an event for a single connection.
fn reply(conn: &ClientConnection, event: &ServerEvent) -> SendOutcome {
    match event.to_json() {
        Ok(json) => {
            let outcome = conn.send_text(Arc::from(json));
            if outcome != SendOutcome::Queued {
                debug!(conn_id = %conn.id, kind = event.kind(), ?outcome, "reply not queued");
            }
            outcome
        }
        Err(e) => {
            warn!(kind = event.kind(), error = %e, "failed to serialize reply");
            SendOutcome::Closed
        }
    }
}
