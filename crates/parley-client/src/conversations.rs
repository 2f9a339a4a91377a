//! Conversation lifecycle: creation, listing, read state, muting

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use parley_protocol::{Conversation, ConversationId, ConversationPatch, UserId};
use parley_store::{ConversationStore, StoreError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ClientResult;

pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationService {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Return the direct conversation between `a` and `b`, creating it if needed.
    pub async fn create_direct(&self, a: &UserId, b: &UserId) -> ClientResult<Conversation> {
        let id = ConversationId::direct(a, b)?;
        if let Some(existing) = self.store.get(&id).await? {
            return Ok(existing);
        }

        let conversation = Conversation::direct(a.clone(), b.clone(), Utc::now())?;
        match self.store.create(conversation).await {
            Ok(created) => {
                info!(conversation_id = %created.id, "Direct conversation created");
                Ok(created)
            }
            // Someone else created it between our read and write.
            Err(StoreError::AlreadyExists(_)) => self
                .store
                .get(&id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Create a named group; the creator is always a participant.
    pub async fn create_group(
        &self,
        creator: &UserId,
        participants: impl IntoIterator<Item = UserId>,
        name: &str,
    ) -> ClientResult<Conversation> {
        let mut members: BTreeSet<UserId> = participants.into_iter().collect();
        members.insert(creator.clone());

        let id = ConversationId::new(format!("group_{}", Uuid::new_v4().simple()))?;
        let conversation = Conversation::group(id, name.trim(), members, Utc::now())?;
        let created = self.store.create(conversation).await?;
        info!(
            conversation_id = %created.id,
            participants = created.participant_ids.len(),
            "Group conversation created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: &ConversationId) -> ClientResult<Option<Conversation>> {
        Ok(self.store.get(id).await?)
    }

    /// Conversations shown in `user`'s inbox, most recent first.
    ///
    /// Deleted conversations are never returned; archived ones only on request.
    pub async fn list_for_user(
        &self,
        user: &UserId,
        include_archived: bool,
    ) -> ClientResult<Vec<Conversation>> {
        let conversations: Vec<Conversation> = self
            .store
            .list_for_user(user)
            .await?
            .into_iter()
            .filter(|c| !c.is_deleted_by(user))
            .filter(|c| include_archived || !c.is_archived_by(user))
            .collect();
        debug!(user = %user, count = conversations.len(), "Listed conversations");
        Ok(conversations)
    }

    pub async fn mark_as_read(&self, id: &ConversationId, user: &UserId) -> ClientResult<()> {
        self.store.mark_read(id, user).await?;
        debug!(conversation_id = %id, user = %user, "Marked as read");
        Ok(())
    }

    pub async fn set_muted(&self, id: &ConversationId, user: &UserId, muted: bool) -> ClientResult<()> {
        let patch = ConversationPatch::Mute {
            user: user.clone(),
            muted,
        };
        self.store.apply_batch(std::slice::from_ref(id), &patch).await?;
        debug!(conversation_id = %id, user = %user, muted, "Mute flag updated");
        Ok(())
    }

    /// Total unread messages for `user` across visible conversations.
    pub async fn unread_total(&self, user: &UserId) -> ClientResult<u64> {
        Ok(self
            .list_for_user(user, false)
            .await?
            .iter()
            .map(|c| u64::from(c.unread_for(user)))
            .sum())
    }
}
