//! Ephemeral presence store for typing indicators

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parley_protocol::{ConversationId, TypingMap, TypingState, UserId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::registry::{ChannelRegistry, SnapshotStream};

/// Low-latency, last-write-wins flags per conversation and user.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Set or clear `user`'s typing flag. Clearing removes the entry.
    async fn set_typing(
        &self,
        conversation_id: &ConversationId,
        user: &UserId,
        is_typing: bool,
    ) -> StoreResult<()>;

    /// Full typing map of the conversation on subscribe and on every change.
    async fn subscribe(&self, conversation_id: &ConversationId)
        -> StoreResult<SnapshotStream<TypingMap>>;
}

/// In-memory presence store
pub struct InMemoryPresenceStore {
    typing: Mutex<HashMap<ConversationId, TypingMap>>,
    channels: ChannelRegistry<ConversationId, TypingMap>,
    offline: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            typing: Mutex::new(HashMap::new()),
            channels: ChannelRegistry::new(),
            offline: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Accepted writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Conversations with at least one live typing subscriber.
    pub fn live_channels(&self) -> usize {
        self.channels.len()
    }

    pub async fn snapshot(&self, conversation_id: &ConversationId) -> TypingMap {
        self.typing
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set_typing(
        &self,
        conversation_id: &ConversationId,
        user: &UserId,
        is_typing: bool,
    ) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("presence channel is offline".to_string()));
        }

        let mut typing = self.typing.lock().await;
        let map = typing.entry(conversation_id.clone()).or_default();
        if is_typing {
            map.insert(
                user.clone(),
                TypingState {
                    is_typing: true,
                    updated_at: Utc::now(),
                },
            );
        } else {
            map.remove(user);
        }
        let snapshot = map.clone();
        if snapshot.is_empty() {
            typing.remove(conversation_id);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(conversation_id = %conversation_id, user = %user, is_typing, "Typing flag written");

        self.channels.publish(conversation_id, snapshot);
        Ok(())
    }

    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<SnapshotStream<TypingMap>> {
        let typing = self.typing.lock().await;
        Ok(self.channels.subscribe(conversation_id.clone(), || {
            typing.get(conversation_id).cloned().unwrap_or_default()
        }))
    }
}
