//! Remote conversation store abstraction

use async_trait::async_trait;
use parley_protocol::{Conversation, ConversationId, ConversationPatch, UserId};

use crate::error::StoreResult;

/// Conversation documents with per-user flag maps.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist a new conversation; fails with `AlreadyExists` on id clash.
    async fn create(&self, conversation: Conversation) -> StoreResult<Conversation>;

    async fn get(&self, id: &ConversationId) -> StoreResult<Option<Conversation>>;

    /// Conversations `user` participates in, most recently updated first.
    async fn list_for_user(&self, user: &UserId) -> StoreResult<Vec<Conversation>>;

    /// Apply `patch` to every id in one atomic write.
    ///
    /// Either every document is updated or none is. Returns the number of
    /// documents written.
    async fn apply_batch(
        &self,
        ids: &[ConversationId],
        patch: &ConversationPatch,
    ) -> StoreResult<usize>;

    /// Reset `user`'s unread counter and mark the messages they received as read.
    async fn mark_read(&self, id: &ConversationId, user: &UserId) -> StoreResult<()>;
}
