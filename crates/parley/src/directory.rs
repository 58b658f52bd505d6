//! Development directory: channels, memberships and session tokens loaded
//! from a JSON file.
//!
//! ```json
//! {
//!   "publicChannels": [1, 42],
//!   "privateChannels": [{ "id": 7, "members": [1, 2] }],
//!   "tokens": { "alice": 1, "bob": 2 }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_core::{ChannelId, UserId};
use parley_server::{ChannelDirectory, Collaborators, InMemoryMessageStore, StaticSessions};
use serde::Deserialize;

/// Channels and credentials for a self-contained hub.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevDirectory {
    /// Channels every user may join.
    pub public_channels: Vec<ChannelId>,
    /// Members-only channels.
    pub private_channels: Vec<PrivateChannel>,
    /// Credential to user mapping.
    pub tokens: StaticSessions,
}

/// A members-only channel.
#[derive(Debug, Deserialize)]
pub struct PrivateChannel {
    /// Channel id.
    pub id: ChannelId,
    /// Users allowed in.
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl DevDirectory {
    /// Read a directory file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid directory file: {}", path.display()))
    }

    /// In-memory collaborators backed by this directory.
    pub fn into_collaborators(self) -> Collaborators {
        let channels = ChannelDirectory::new();
        for channel_id in self.public_channels {
            channels.add_public(channel_id);
        }
        for private in self.private_channels {
            channels.add_private(private.id, private.members);
        }
        Collaborators {
            authorizer: Arc::new(channels),
            store: Arc::new(InMemoryMessageStore::new()),
            sessions: Arc::new(self.tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_server::Authorizer;
    use std::io::Write;

    #[test]
    fn loads_camel_case_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "publicChannels": [1, 42],
                "privateChannels": [{{ "id": 7, "members": [1] }}],
                "tokens": {{ "alice": 1, "bob": 2 }}
            }}"#
        )
        .unwrap();

        let dir = DevDirectory::load(file.path()).unwrap();
        assert_eq!(dir.public_channels, vec![ChannelId::new(1), ChannelId::new(42)]);
        assert_eq!(dir.private_channels.len(), 1);
        assert_eq!(dir.private_channels[0].members, vec![UserId::new(1)]);
        assert_eq!(dir.tokens.len(), 2);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let dir: DevDirectory = serde_json::from_str("{}").unwrap();
        assert!(dir.public_channels.is_empty());
        assert!(dir.tokens.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DevDirectory::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read directory file"));
    }

    #[tokio::test]
    async fn collaborators_enforce_membership() {
        let dir: DevDirectory = serde_json::from_str(
            r#"{"publicChannels": [1], "privateChannels": [{"id": 7, "members": [1]}]}"#,
        )
        .unwrap();
        let collaborators = dir.into_collaborators();
        let auth = &collaborators.authorizer;
        assert!(auth.authorize(UserId::new(2), ChannelId::new(1)).await.unwrap());
        assert!(auth.authorize(UserId::new(1), ChannelId::new(7)).await.unwrap());
        assert!(!auth.authorize(UserId::new(2), ChannelId::new(7)).await.unwrap());
        assert!(!auth.authorize(UserId::new(1), ChannelId::new(99)).await.unwrap());
    }
}
