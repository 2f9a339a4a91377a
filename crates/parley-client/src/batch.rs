//! Batched archive/delete of conversations

use std::sync::Arc;

use parley_protocol::{ConversationId, ConversationPatch, UserId, MAX_BATCH_SIZE};
use parley_store::ConversationStore;
use tracing::{info, warn};

use crate::error::BatchError;
use crate::metrics::BATCH_OPERATIONS;

/// Applies one per-user flag to many conversations in a single atomic write.
pub struct ConversationBatch {
    store: Arc<dyn ConversationStore>,
    limit: usize,
}

impl ConversationBatch {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            limit: MAX_BATCH_SIZE,
        }
    }

    /// Lower the per-call limit. Values above the platform ceiling are clamped.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn batch_archive_conversations(
        &self,
        ids: &[ConversationId],
        user: &UserId,
        archive: bool,
    ) -> Result<usize, BatchError> {
        let patch = ConversationPatch::Archive {
            user: user.clone(),
            archived: archive,
        };
        let operation = if archive { "archive" } else { "unarchive" };
        self.apply(operation, ids, &patch).await
    }

    pub async fn batch_delete_conversations(
        &self,
        ids: &[ConversationId],
        user: &UserId,
    ) -> Result<usize, BatchError> {
        let patch = ConversationPatch::Delete { user: user.clone() };
        self.apply("delete", ids, &patch).await
    }

    async fn apply(
        &self,
        operation: &'static str,
        ids: &[ConversationId],
        patch: &ConversationPatch,
    ) -> Result<usize, BatchError> {
        if ids.is_empty() {
            return Err(BatchError::Empty);
        }
        if ids.len() > self.limit {
            BATCH_OPERATIONS
                .with_label_values(&[operation, "rejected"])
                .inc();
            return Err(BatchError::TooLarge {
                count: ids.len(),
                limit: self.limit,
            });
        }

        match self.store.apply_batch(ids, patch).await {
            Ok(written) => {
                BATCH_OPERATIONS.with_label_values(&[operation, "ok"]).inc();
                info!(operation, user = %patch.user(), count = written, "Conversations updated");
                Ok(written)
            }
            Err(err) => {
                BATCH_OPERATIONS.with_label_values(&[operation, "error"]).inc();
                warn!(operation, user = %patch.user(), error = %err, "Batch update failed");
                Err(err.into())
            }
        }
    }
}
