//! Remote message store abstraction

use async_trait::async_trait;
use parley_protocol::{ConversationId, Message, MessageDraft, MessageReceipt};

use crate::error::StoreResult;
use crate::registry::SnapshotStream;

/// Append-only, per-conversation message collection.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably write a message and return its authoritative id and timestamp.
    ///
    /// The same transaction refreshes the conversation preview and bumps the
    /// unread counters of every participant except the sender.
    async fn append(&self, draft: MessageDraft) -> StoreResult<MessageReceipt>;

    /// Full snapshots of the newest `window` messages, oldest first.
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
        window: usize,
    ) -> StoreResult<SnapshotStream<Vec<Message>>>;
}

/// The newest `window` messages of an ascending list.
pub fn tail(messages: &[Message], window: usize) -> Vec<Message> {
    let start = messages.len().saturating_sub(window);
    messages[start..].to_vec()
}
