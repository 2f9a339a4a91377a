//! One user's live view of one conversation

use std::sync::Arc;

use parley_protocol::{ClientToken, ConversationId, Message, MessageId, UserId};
use parley_store::MessageStore;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientResult, SendError};
use crate::feed::MessageFeed;
use crate::outbox::{Outbox, SendOutcome};
use crate::subscription::Subscription;
use crate::view::SharedView;

/// Shared view, outbox and feed wired together.
pub struct ChatSession {
    conversation_id: ConversationId,
    user_id: UserId,
    view: Arc<SharedView>,
    outbox: Outbox,
    feed: MessageFeed,
}

impl ChatSession {
    pub async fn open(
        store: Arc<dyn MessageStore>,
        conversation_id: ConversationId,
        user_id: UserId,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        let view = SharedView::new(conversation_id.clone(), user_id.clone());
        let feed = MessageFeed::open(
            store.as_ref(),
            Arc::clone(&view),
            conversation_id.clone(),
            config.message_window,
        )
        .await?;
        let outbox = Outbox::new(
            store,
            Arc::clone(&view),
            conversation_id.clone(),
            user_id.clone(),
            config.max_message_length,
        );
        info!(conversation_id = %conversation_id, user_id = %user_id, "Chat session opened");

        Ok(Self {
            conversation_id,
            user_id,
            view,
            outbox,
            feed,
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Cloneable handle for sending from other tasks.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn feed(&self) -> &MessageFeed {
        &self.feed
    }

    pub fn stage(&self, text: &str) -> Result<Option<ClientToken>, SendError> {
        self.outbox.stage(text)
    }

    pub async fn send(&self, text: &str) -> Result<Option<SendOutcome>, SendError> {
        self.outbox.send(text).await
    }

    pub async fn retry_message(&self, id: &MessageId) -> Result<SendOutcome, SendError> {
        self.outbox.retry_message(id).await
    }

    pub fn visible(&self) -> Vec<Message> {
        self.view.visible()
    }

    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: FnMut(Vec<Message>) + Send + 'static,
    {
        self.feed.subscribe(on_change)
    }

    pub fn is_open(&self) -> bool {
        self.view.is_alive()
    }

    /// Stop listening. In-flight writes still complete but no longer republish.
    pub fn close(&self) {
        self.feed.close();
        self.view.close();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}
