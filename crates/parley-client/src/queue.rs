//! Client-side state that outlives a single connection.

use std::collections::{BTreeSet, VecDeque};

use parley_core::{ChannelId, ClientMessage};

/// Messages sent while no session is connected, in send order.
///
/// Unbounded: it only ever holds what the caller produced during one outage.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<ClientMessage>,
}

impl OutboundQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: ClientMessage) {
        self.items.push_back(message);
    }

    /// Oldest message, left in place until it has been written.
    pub fn front(&self) -> Option<&ClientMessage> {
        self.items.front()
    }

    /// Remove the oldest message.
    pub fn pop(&mut self) -> Option<ClientMessage> {
        self.items.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Channels the caller wants events for, across reconnects.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    channels: BTreeSet<ChannelId>,
}

impl SubscriptionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Returns `false` if it was already present.
    pub fn insert(&mut self, channel_id: ChannelId) -> bool {
        self.channels.insert(channel_id)
    }

    /// Drop a channel. Returns `false` if it was not present.
    pub fn remove(&mut self, channel_id: ChannelId) -> bool {
        self.channels.remove(&channel_id)
    }

    /// Whether `channel_id` is wanted.
    pub fn contains(&self, channel_id: ChannelId) -> bool {
        self.channels.contains(&channel_id)
    }

    /// Channels in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().copied()
    }

    /// Snapshot in ascending id order.
    pub fn to_vec(&self) -> Vec<ChannelId> {
        self.iter().collect()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is wanted.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Forget every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
