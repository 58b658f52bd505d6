//! Collaborators the hub consults but does not own.
//!
//! The hub never decides access or storage on its own. Each concern sits
//! behind a trait so production deployments can plug in their database while
//! tests and the dev binary use the in-memory implementations in [`memory`].

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{ChannelId, MessageId, StoredMessage, UserId};
use thiserror::Error;

pub use memory::{ChannelDirectory, InMemoryMessageStore, StaticSessions};

/// Failure reported by a collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The backing service could not be reached or failed internally.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    /// The request was understood and refused.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Decides whether a user may subscribe to or post in a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `Ok(true)` grants access. An error is treated as a denial.
    async fn authorize(&self, user_id: UserId, channel_id: ChannelId)
    -> Result<bool, CollaboratorError>;
}

/// Durably appends chat messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message and return the committed record.
    async fn persist_message(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        content: &str,
        parent_id: Option<MessageId>,
    ) -> Result<StoredMessage, CollaboratorError>;
}

/// Maps a session credential carried by the upgrade request to a user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// `None` when the credential is unknown or expired.
    async fn resolve(&self, credential: &str) -> Option<UserId>;
}

/// The collaborator set a server is built with.
#[derive(Clone)]
pub struct Collaborators {
    /// Channel access decisions.
    pub authorizer: Arc<dyn Authorizer>,
    /// Durable message log.
    pub store: Arc<dyn MessageStore>,
    /// Upgrade credential lookup.
    pub sessions: Arc<dyn SessionResolver>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            CollaboratorError::Unavailable("db down".into()).to_string(),
            "collaborator unavailable: db down"
        );
        assert_eq!(
            CollaboratorError::Rejected("too long".into()).to_string(),
            "rejected: too long"
        );
    }

    #[tokio::test]
    async fn traits_are_object_safe() {
        let directory: Box<dyn Authorizer> = Box::new(ChannelDirectory::new());
        assert!(!directory.authorize(UserId::new(1), ChannelId::new(1)).await.unwrap());
    }
}
