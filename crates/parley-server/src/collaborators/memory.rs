//! In-memory collaborators for tests and the development server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use parley_core::{ChannelId, MessageId, StoredMessage, UserId};
use serde::Deserialize;

use super::{Authorizer, CollaboratorError, MessageStore, SessionResolver};

#[derive(Clone, Debug, Default)]
struct ChannelEntry {
    private: bool,
    members: HashSet<UserId>,
}

/// Channel access table.
///
/// Public channels admit everyone. Private channels (including direct
/// messages) admit only their members. Unknown channels admit nobody.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
}

impl ChannelDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a public channel.
    pub fn add_public(&self, channel_id: ChannelId) {
        let _ = self
            .channels
            .write()
            .insert(channel_id, ChannelEntry::default());
    }

    /// Add or replace a private channel with its member list.
    pub fn add_private(&self, channel_id: ChannelId, members: impl IntoIterator<Item = UserId>) {
        let entry = ChannelEntry {
            private: true,
            members: members.into_iter().collect(),
        };
        let _ = self.channels.write().insert(channel_id, entry);
    }

    /// Grant a user access to a private channel. No-op for unknown channels.
    pub fn add_member(&self, channel_id: ChannelId, user_id: UserId) {
        if let Some(entry) = self.channels.write().get_mut(&channel_id) {
            let _ = entry.members.insert(user_id);
        }
    }

    /// Revoke a user's access to a private channel.
    pub fn remove_member(&self, channel_id: ChannelId, user_id: UserId) {
        if let Some(entry) = self.channels.write().get_mut(&channel_id) {
            let _ = entry.members.remove(&user_id);
        }
    }

    /// Drop a channel entirely.
    pub fn remove_channel(&self, channel_id: ChannelId) {
        let _ = self.channels.write().remove(&channel_id);
    }

    fn allows(&self, user_id: UserId, channel_id: ChannelId) -> bool {
        self.channels
            .read()
            .get(&channel_id)
            .is_some_and(|entry| !entry.private || entry.members.contains(&user_id))
    }
}

#[async_trait]
impl Authorizer for ChannelDirectory {
    async fn authorize(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.allows(user_id, channel_id))
    }
}

/// Append-only message log with monotonic ids.
#[derive(Debug)]
pub struct InMemoryMessageStore {
    next_id: AtomicI64,
    messages: Mutex<Vec<StoredMessage>>,
    max_content_len: usize,
}

impl InMemoryMessageStore {
    /// Empty store. Ids start at 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            messages: Mutex::new(Vec::new()),
            max_content_len: 4000,
        }
    }

    /// Override the longest accepted message body, in characters.
    #[must_use]
    pub fn with_max_content_len(mut self, max: usize) -> Self {
        self.max_content_len = max;
        self
    }

    /// Messages stored for one channel, oldest first.
    pub fn messages(&self, channel_id: ChannelId) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    /// Total stored messages.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist_message(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        content: &str,
        parent_id: Option<MessageId>,
    ) -> Result<StoredMessage, CollaboratorError> {
        if content.chars().count() > self.max_content_len {
            return Err(CollaboratorError::Rejected(format!(
                "message exceeds {} characters",
                self.max_content_len
            )));
        }
        let mut messages = self.messages.lock();
        if let Some(parent) = parent_id {
            let parent_in_channel = messages
                .iter()
                .any(|m| m.id == parent && m.channel_id == channel_id);
            if !parent_in_channel {
                return Err(CollaboratorError::Rejected(format!(
                    "parent message {parent} not found in channel {channel_id}"
                )));
            }
        }
        let record = StoredMessage {
            id: MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
            channel_id,
            user_id,
            content: content.to_owned(),
            created_at: Utc::now(),
            parent_id,
        };
        messages.push(record.clone());
        Ok(record)
    }
}

/// Fixed credential table.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticSessions {
    tokens: HashMap<String, UserId>,
}

impl StaticSessions {
    /// Empty table: every credential is rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
        let _ = self.tokens.insert(token.into(), user_id);
        self
    }

    /// Number of known credentials.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no credential is known.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl SessionResolver for StaticSessions {
    async fn resolve(&self, credential: &str) -> Option<UserId> {
        self.tokens.get(credential).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    #[tokio::test]
    async fn public_channel_admits_everyone() {
        let dir = ChannelDirectory::new();
        dir.add_public(ChannelId::new(1));
        assert!(dir.authorize(ALICE, ChannelId::new(1)).await.unwrap());
        assert!(dir.authorize(BOB, ChannelId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn private_channel_admits_members_only() {
        let dir = ChannelDirectory::new();
        dir.add_private(ChannelId::new(5), [ALICE]);
        assert!(dir.authorize(ALICE, ChannelId::new(5)).await.unwrap());
        assert!(!dir.authorize(BOB, ChannelId::new(5)).await.unwrap());

        dir.add_member(ChannelId::new(5), BOB);
        assert!(dir.authorize(BOB, ChannelId::new(5)).await.unwrap());
        dir.remove_member(ChannelId::new(5), ALICE);
        assert!(!dir.authorize(ALICE, ChannelId::new(5)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_channel_is_denied() {
        let dir = ChannelDirectory::new();
        assert!(!dir.authorize(ALICE, ChannelId::new(99)).await.unwrap());
        dir.add_public(ChannelId::new(99));
        dir.remove_channel(ChannelId::new(99));
        assert!(!dir.authorize(ALICE, ChannelId::new(99)).await.unwrap());
    }

    #[tokio::test]
    async fn store_assigns_increasing_ids() {
        let store = InMemoryMessageStore::new();
        let a = store
            .persist_message(ChannelId::new(1), ALICE, "one", None)
            .await
            .unwrap();
        let b = store
            .persist_message(ChannelId::new(1), BOB, "two", None)
            .await
            .unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.messages(ChannelId::new(1)).len(), 2);
        assert!(store.messages(ChannelId::new(2)).is_empty());
    }

    #[tokio::test]
    async fn store_checks_parent_channel() {
        let store = InMemoryMessageStore::new();
        let root = store
            .persist_message(ChannelId::new(1), ALICE, "root", None)
            .await
            .unwrap();
        let reply = store
            .persist_message(ChannelId::new(1), BOB, "re", Some(root.id))
            .await
            .unwrap();
        assert_eq!(reply.parent_id, Some(root.id));

        let err = store
            .persist_message(ChannelId::new(2), BOB, "re", Some(root.id))
            .await;
        assert_matches!(err, Err(CollaboratorError::Rejected(_)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn store_rejects_oversized_content() {
        let store = InMemoryMessageStore::new().with_max_content_len(3);
        let err = store
            .persist_message(ChannelId::new(1), ALICE, "long", None)
            .await;
        assert_matches!(err, Err(CollaboratorError::Rejected(msg)) if msg.contains('3'));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn static_sessions_resolve_known_tokens() {
        let sessions = StaticSessions::new().with_token("tok-a", ALICE);
        assert_eq!(sessions.resolve("tok-a").await, Some(ALICE));
        assert_eq!(sessions.resolve("tok-b").await, None);
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn static_sessions_deserialize_from_map() {
        let sessions: StaticSessions = serde_json::from_str(r#"{"tok": 4}"#).unwrap();
        assert_eq!(sessions.len(), 1);
    }
}
