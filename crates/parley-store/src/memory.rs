//! In-memory message and conversation store for tests and local demos

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use parley_protocol::{
    Conversation, ConversationId, ConversationPatch, Message, MessageDraft, MessageReceipt, UserId,
    MAX_BATCH_SIZE,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::error::{StoreError, StoreResult};
use crate::message::{tail, MessageStore};
use crate::registry::{ChannelRegistry, SnapshotStream};

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    denied: HashSet<ConversationId>,
    offline: bool,
    injected_failures: VecDeque<StoreError>,
    sequence: u64,
}

impl State {
    // Offline mode and queued failures apply to every write.
    fn check_writable(&mut self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        if let Some(err) = self.injected_failures.pop_front() {
            return Err(err);
        }
        Ok(())
    }

    fn check_allowed(&self, id: &ConversationId) -> StoreResult<()> {
        if self.denied.contains(id) {
            return Err(StoreError::PermissionDenied(format!(
                "access to conversation {id} is denied"
            )));
        }
        Ok(())
    }
}

/// Message + conversation store sharing one lock, so a message append and its
/// conversation bookkeeping form a single transaction.
pub struct InMemoryStore {
    state: RwLock<State>,
    feeds: ChannelRegistry<ConversationId, Arc<Vec<Message>>>,
    id_prefix: Option<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            feeds: ChannelRegistry::new(),
            id_prefix: None,
        }
    }

    /// Assign ids `"{prefix}-1"`, `"{prefix}-2"`, ... instead of random ones.
    pub fn with_sequential_ids(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: Some(prefix.into()),
            ..Self::new()
        }
    }

    /// Make every write fail with `Unavailable` until switched back.
    pub async fn set_offline(&self, offline: bool) {
        self.state.write().await.offline = offline;
    }

    /// Fail the next `count` writes with `error`.
    pub async fn fail_next_writes(&self, count: usize, error: StoreError) {
        let mut state = self.state.write().await;
        for _ in 0..count {
            state.injected_failures.push_back(error.clone());
        }
    }

    /// Reject every read and write touching `id` with `PermissionDenied`.
    pub async fn deny_conversation(&self, id: ConversationId) {
        self.state.write().await.denied.insert(id);
    }

    pub async fn messages(&self, id: &ConversationId) -> Vec<Message> {
        self.state
            .read()
            .await
            .messages
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Live message feeds, for lifecycle assertions.
    pub fn live_feeds(&self) -> usize {
        self.feeds.len()
    }

    fn next_id(&self, state: &mut State) -> String {
        state.sequence += 1;
        match &self.id_prefix {
            Some(prefix) => format!("{prefix}-{}", state.sequence),
            None => format!("msg_{}", Uuid::new_v4().simple()),
        }
    }

    fn publish_messages(&self, state: &State, id: &ConversationId) {
        let snapshot = state.messages.get(id).cloned().unwrap_or_default();
        self.feeds.publish(id, Arc::new(snapshot));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// Server timestamps are strictly increasing within a conversation.
fn server_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if previous >= now => previous + Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(&self, draft: MessageDraft) -> StoreResult<MessageReceipt> {
        let mut state = self.state.write().await;
        state.check_writable()?;
        state.check_allowed(&draft.conversation_id)?;

        let conversation = state
            .conversations
            .get(&draft.conversation_id)
            .ok_or_else(|| StoreError::NotFound(draft.conversation_id.to_string()))?;
        if !conversation.is_participant(&draft.sender_id) {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a participant of {}",
                draft.sender_id, draft.conversation_id
            )));
        }

        let id = self.next_id(&mut state);
        let previous = state
            .messages
            .get(&draft.conversation_id)
            .and_then(|messages| messages.last())
            .map(|message| message.timestamp);
        let timestamp = server_timestamp(previous);

        let message = Message::confirmed(
            id.clone(),
            draft.conversation_id.clone(),
            draft.sender_id.clone(),
            draft.text.clone(),
            timestamp,
        );
        state
            .messages
            .entry(draft.conversation_id.clone())
            .or_default()
            .push(message);
        if let Some(conversation) = state.conversations.get_mut(&draft.conversation_id) {
            conversation.record_message(&draft.sender_id, &draft.text, timestamp);
        }

        debug!(conversation_id = %draft.conversation_id, message_id = %id, "Message appended");
        self.publish_messages(&state, &draft.conversation_id);

        Ok(MessageReceipt { id, timestamp })
    }

    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
        window: usize,
    ) -> StoreResult<SnapshotStream<Vec<Message>>> {
        // Holding the read lock keeps appends from slipping between seed and registration.
        let state = self.state.read().await;
        state.check_allowed(conversation_id)?;

        let stream = self.feeds.subscribe(conversation_id.clone(), || {
            Arc::new(
                state
                    .messages
                    .get(conversation_id)
                    .cloned()
                    .unwrap_or_default(),
            )
        });
        Ok(Box::pin(stream.map(move |messages| tail(&messages, window))))
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create(&self, conversation: Conversation) -> StoreResult<Conversation> {
        let mut state = self.state.write().await;
        state.check_writable()?;
        if state.conversations.contains_key(&conversation.id) {
            return Err(StoreError::AlreadyExists(conversation.id.to_string()));
        }
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        debug!(conversation_id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    async fn get(&self, id: &ConversationId) -> StoreResult<Option<Conversation>> {
        let state = self.state.read().await;
        state.check_allowed(id)?;
        Ok(state.conversations.get(id).cloned())
    }

    async fn list_for_user(&self, user: &UserId) -> StoreResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| c.is_participant(user) && !state.denied.contains(&c.id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn apply_batch(
        &self,
        ids: &[ConversationId],
        patch: &ConversationPatch,
    ) -> StoreResult<usize> {
        if ids.len() > MAX_BATCH_SIZE {
            return Err(StoreError::BatchTooLarge {
                count: ids.len(),
                limit: MAX_BATCH_SIZE,
            });
        }

        let mut state = self.state.write().await;
        state.check_writable()?;

        // Validate the whole set before touching anything.
        for id in ids {
            state.check_allowed(id)?;
            let conversation = state
                .conversations
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if !conversation.is_participant(patch.user()) {
                warn!(conversation_id = %id, user = %patch.user(), "Batch touches foreign conversation");
                return Err(StoreError::PermissionDenied(format!(
                    "{} is not a participant of {id}",
                    patch.user()
                )));
            }
        }

        let now = Utc::now();
        let unique: HashSet<&ConversationId> = ids.iter().collect();
        for id in &unique {
            if let Some(conversation) = state.conversations.get_mut(*id) {
                conversation.apply(patch, now);
            }
        }
        debug!(count = unique.len(), "Batch applied");
        Ok(unique.len())
    }

    async fn mark_read(&self, id: &ConversationId, user: &UserId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check_writable()?;
        state.check_allowed(id)?;

        let now = Utc::now();
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !conversation.is_participant(user) {
            return Err(StoreError::PermissionDenied(format!(
                "{user} is not a participant of {id}"
            )));
        }
        conversation.mark_read(user, now);

        let mut changed = false;
        if let Some(messages) = state.messages.get_mut(id) {
            for message in messages.iter_mut().filter(|m| &m.sender_id != user) {
                changed |= message.read_by.insert(user.clone());
            }
        }
        if changed {
            self.publish_messages(&state, id);
        }
        Ok(())
    }
}
