//! Optimistic send path
//!
//! `stage` inserts a placeholder synchronously so the UI can render it on
//! the same frame; `dispatch` performs the remote write and folds its
//! outcome back into the shared view.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parley_protocol::{
    validate_message_text, ClientToken, ConversationId, DeliveryFailure, MessageDraft, MessageId,
    UserId,
};
use parley_store::MessageStore;
use tracing::{debug, info, warn};

use crate::error::SendError;
use crate::metrics::{MESSAGES_DELIVERED, MESSAGES_FAILED, MESSAGES_RETRIED, MESSAGES_STAGED, SEND_LATENCY};
use crate::view::SharedView;

/// Outcome of a remote write. Failures are reported here, not as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { id: String },
    Failed {
        token: ClientToken,
        failure: DeliveryFailure,
    },
}

impl SendOutcome {
    /// The id the message is currently visible under.
    pub fn message_id(&self) -> MessageId {
        match self {
            SendOutcome::Delivered { id } => MessageId::remote(id.clone()),
            SendOutcome::Failed { token, .. } => MessageId::Local(*token),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered { .. })
    }
}

#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn MessageStore>,
    view: Arc<SharedView>,
    conversation_id: ConversationId,
    sender_id: UserId,
    max_length: usize,
}

impl Outbox {
    pub fn new(
        store: Arc<dyn MessageStore>,
        view: Arc<SharedView>,
        conversation_id: ConversationId,
        sender_id: UserId,
        max_length: usize,
    ) -> Self {
        Self {
            store,
            view,
            conversation_id,
            sender_id,
            max_length,
        }
    }

    /// Validate `text` and insert a `sending` placeholder.
    ///
    /// Whitespace-only input is a no-op and yields `Ok(None)`.
    pub fn stage(&self, text: &str) -> Result<Option<ClientToken>, SendError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let text = validate_message_text(text, self.max_length)?;
        let token = self.view.update(|state| state.stage(text, Utc::now()));
        MESSAGES_STAGED.inc();
        debug!(conversation_id = %self.conversation_id, token = %token, "Message staged");
        Ok(Some(token))
    }

    /// Write a staged message to the store.
    pub async fn dispatch(&self, token: ClientToken) -> Result<SendOutcome, SendError> {
        let text = self
            .view
            .read(|state| state.pending_text(&token))
            .ok_or(SendError::UnknownMessage(MessageId::Local(token)))?;
        Ok(self.deliver(token, text).await)
    }

    /// Stage then dispatch. `Ok(None)` when there was nothing to send.
    pub async fn send(&self, text: &str) -> Result<Option<SendOutcome>, SendError> {
        match self.stage(text)? {
            Some(token) => Ok(Some(self.dispatch(token).await?)),
            None => Ok(None),
        }
    }

    /// Re-send a failed local message with its original text.
    pub async fn retry_message(&self, id: &MessageId) -> Result<SendOutcome, SendError> {
        let not_retryable = || SendError::NotRetryable(id.clone());
        let token = id.token().ok_or_else(not_retryable)?;
        let text = self
            .view
            .update(|state| state.begin_retry(&token, Utc::now()))
            .ok_or_else(not_retryable)?;

        MESSAGES_RETRIED.inc();
        info!(conversation_id = %self.conversation_id, token = %token, "Retrying failed message");
        Ok(self.deliver(token, text).await)
    }

    async fn deliver(&self, token: ClientToken, text: String) -> SendOutcome {
        let draft = MessageDraft::new(self.conversation_id.clone(), self.sender_id.clone(), text);
        let started = Instant::now();

        match self.store.append(draft).await {
            Ok(receipt) => {
                SEND_LATENCY.observe(started.elapsed().as_secs_f64());
                MESSAGES_DELIVERED.inc();
                debug!(
                    conversation_id = %self.conversation_id,
                    token = %token,
                    message_id = %receipt.id,
                    "Message delivered"
                );
                let id = receipt.id.clone();
                self.view.update(|state| state.acknowledge(token, receipt));
                SendOutcome::Delivered { id }
            }
            Err(err) => {
                let failure = if err.is_permission_denied() {
                    DeliveryFailure::Forbidden
                } else {
                    DeliveryFailure::Transient
                };
                MESSAGES_FAILED
                    .with_label_values(&[failure_label(failure)])
                    .inc();
                warn!(
                    conversation_id = %self.conversation_id,
                    token = %token,
                    error = %err,
                    "Message send failed"
                );
                self.view.update(|state| state.fail(&token, failure));
                SendOutcome::Failed { token, failure }
            }
        }
    }
}

fn failure_label(failure: DeliveryFailure) -> &'static str {
    match failure {
        DeliveryFailure::Transient => "transient",
        DeliveryFailure::Forbidden => "forbidden",
    }
}
