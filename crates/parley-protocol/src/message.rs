//! Chat message envelope and its AI-enrichment metadata.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Locally originated and not yet confirmed by the store.
    Sending,
    Delivered,
    /// The write failed; the entry stays visible and can be retried.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a local send ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFailure {
    /// Network or backend hiccup; retrying may succeed.
    Transient,
    /// The sender is not allowed to post here; retrying will not help.
    Forbidden,
}

impl DeliveryFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryFailure::Transient)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Score in `-1.0..=1.0`.
    pub score: f32,
    pub label: SentimentLabel,
}

impl Sentiment {
    /// Build a sentiment from a raw score, clamping it and deriving the label.
    pub fn from_score(score: f32) -> Self {
        let score = score.clamp(-1.0, 1.0);
        let label = if score > 0.25 {
            SentimentLabel::Positive
        } else if score < -0.25 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        Self { score, label }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    Personal,
    Urgent,
    Spam,
    Fan,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityKind {
    Sponsorship,
    Collaboration,
    Sale,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityScore {
    /// Score in `0..=100`.
    pub score: u8,
    pub kind: OpportunityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqFlags {
    pub is_faq: bool,
    pub auto_responded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_question_id: Option<String>,
}

/// Enrichment filled in asynchronously by AI collaborators.
///
/// Every field is independently absent or present; nothing in the core waits
/// for any of them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opportunity: Option<OpportunityScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faq: Option<FaqFlags>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.sentiment.is_none()
            && self.category.is_none()
            && self.opportunity.is_none()
            && self.faq.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DeliveryFailure>,
}

impl Message {
    /// A message as the store reports it after confirmation.
    pub fn confirmed(
        id: impl Into<String>,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::remote(id),
            conversation_id,
            sender_id,
            text: text.into(),
            status: MessageStatus::Delivered,
            timestamp,
            read_by: BTreeSet::new(),
            metadata: MessageMetadata::default(),
            failure: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }
}

/// Payload handed to the remote message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
}

impl MessageDraft {
    pub fn new(conversation_id: ConversationId, sender_id: UserId, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            text: text.into(),
        }
    }
}

/// What the store returns once a write is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn sentiment_from_score_clamps_and_labels() {
        assert_eq!(Sentiment::from_score(3.0).score, 1.0);
        assert_eq!(Sentiment::from_score(0.9).label, SentimentLabel::Positive);
        assert_eq!(Sentiment::from_score(0.0).label, SentimentLabel::Neutral);
        assert_eq!(Sentiment::from_score(-0.6).label, SentimentLabel::Negative);
    }

    #[test]
    fn confirmed_message_serializes_camel_case_without_empty_metadata() {
        let message = Message::confirmed(
            "srv-1",
            "u1_u2".parse().unwrap(),
            "u1".parse().unwrap(),
            "hi",
            Utc.with_ymd_and_hms(2026, 2, 14, 12, 0, 0).unwrap(),
        );

        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["conversationId"], "u1_u2");
        assert_eq!(encoded["senderId"], "u1");
        assert_eq!(encoded["status"], "delivered");
        assert_eq!(encoded["id"]["kind"], "remote");
        assert_eq!(encoded["id"]["value"], "srv-1");
        assert!(encoded.get("metadata").is_none());
        assert!(encoded.get("failure").is_none());
    }

    #[test]
    fn metadata_fields_are_independent() {
        let metadata = MessageMetadata {
            category: Some(Category::Business),
            ..Default::default()
        };
        assert!(!metadata.is_empty());

        let encoded = serde_json::to_value(&metadata).unwrap();
        assert_eq!(encoded["category"], "business");
        assert!(encoded.get("sentiment").is_none());
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(DeliveryFailure::Transient.is_retryable());
        assert!(!DeliveryFailure::Forbidden.is_retryable());
    }
}
