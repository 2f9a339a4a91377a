//! Conversation documents and the per-user flag maps they carry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{ConversationId, IdError, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("a group conversation needs at least two participants, got {0}")]
    TooFewParticipants(usize),
    #[error("group name cannot be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Denormalized copy of the newest message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub text: String,
    pub sender_id: UserId,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub participant_ids: BTreeSet<UserId>,
    pub unread_count: BTreeMap<UserId, u32>,
    pub archived_by: BTreeMap<UserId, bool>,
    pub deleted_by: BTreeMap<UserId, bool>,
    pub muted_by: BTreeMap<UserId, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Direct conversation between two distinct users, id derived from both.
    pub fn direct(a: UserId, b: UserId, now: DateTime<Utc>) -> Result<Self, ConversationError> {
        let id = ConversationId::direct(&a, &b)?;
        Ok(Self::with_participants(
            id,
            ConversationKind::Direct,
            None,
            [a, b].into_iter().collect(),
            now,
        ))
    }

    pub fn group(
        id: ConversationId,
        name: impl Into<String>,
        participants: impl IntoIterator<Item = UserId>,
        now: DateTime<Utc>,
    ) -> Result<Self, ConversationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConversationError::EmptyName);
        }
        let participants: BTreeSet<UserId> = participants.into_iter().collect();
        if participants.len() < 2 {
            return Err(ConversationError::TooFewParticipants(participants.len()));
        }
        Ok(Self::with_participants(
            id,
            ConversationKind::Group,
            Some(name),
            participants,
            now,
        ))
    }

    // Every per-user map gets an entry for every participant up front.
    fn with_participants(
        id: ConversationId,
        kind: ConversationKind,
        name: Option<String>,
        participant_ids: BTreeSet<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        let flags = |value: bool| -> BTreeMap<UserId, bool> {
            participant_ids.iter().map(|u| (u.clone(), value)).collect()
        };
        Self {
            unread_count: participant_ids.iter().map(|u| (u.clone(), 0)).collect(),
            archived_by: flags(false),
            deleted_by: flags(false),
            muted_by: flags(false),
            id,
            kind,
            name,
            participant_ids,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }

    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.unread_count.get(user).copied().unwrap_or(0)
    }

    pub fn is_archived_by(&self, user: &UserId) -> bool {
        self.archived_by.get(user).copied().unwrap_or(false)
    }

    pub fn is_deleted_by(&self, user: &UserId) -> bool {
        self.deleted_by.get(user).copied().unwrap_or(false)
    }

    pub fn is_muted_by(&self, user: &UserId) -> bool {
        self.muted_by.get(user).copied().unwrap_or(false)
    }

    /// Record a new message: refresh the preview and bump unread counts of
    /// everyone except the sender.
    pub fn record_message(&mut self, sender: &UserId, text: &str, timestamp: DateTime<Utc>) {
        for (user, count) in self.unread_count.iter_mut() {
            if user != sender {
                *count = count.saturating_add(1);
            }
        }
        self.last_message = Some(LastMessage {
            text: text.to_string(),
            sender_id: sender.clone(),
            timestamp,
        });
        self.updated_at = timestamp;
    }

    pub fn mark_read(&mut self, user: &UserId, now: DateTime<Utc>) {
        if let Some(count) = self.unread_count.get_mut(user) {
            *count = 0;
            self.updated_at = now;
        }
    }

    /// Apply one per-user flag change; other users and other flags are left alone.
    pub fn apply(&mut self, patch: &ConversationPatch, now: DateTime<Utc>) {
        match patch {
            ConversationPatch::Archive { user, archived } => {
                self.archived_by.insert(user.clone(), *archived);
            }
            ConversationPatch::Delete { user } => {
                self.deleted_by.insert(user.clone(), true);
            }
            ConversationPatch::Mute { user, muted } => {
                self.muted_by.insert(user.clone(), *muted);
            }
        }
        self.updated_at = now;
    }
}

/// Per-user flag mutation applied to one or many conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ConversationPatch {
    Archive { user: UserId, archived: bool },
    Delete { user: UserId },
    Mute { user: UserId, muted: bool },
}

impl ConversationPatch {
    pub fn user(&self) -> &UserId {
        match self {
            ConversationPatch::Archive { user, .. }
            | ConversationPatch::Delete { user }
            | ConversationPatch::Mute { user, .. } => user,
        }
    }
}
