//! Parley protocol types and validation logic.
//!
//! This crate defines:
//! - identifiers (`UserId`, `ConversationId`, `MessageId`, `ClientToken`)
//! - the message envelope and its AI-enrichment metadata
//! - conversation documents with per-user flag maps
//! - typing presence and dashboard aggregates
//! - limits enforced before any remote write

pub mod conversation;
pub mod dashboard;
pub mod id;
pub mod message;
pub mod typing;
pub mod validation;

pub use conversation::{
    Conversation, ConversationError, ConversationKind, ConversationPatch, LastMessage,
};
pub use dashboard::{DashboardSummary, FaqMetrics, Opportunity, PeriodDeltas, VoiceMetrics};
pub use id::{ClientToken, ConversationId, IdError, MessageId, UserId};
pub use message::{
    Category, DeliveryFailure, FaqFlags, Message, MessageDraft, MessageMetadata, MessageReceipt,
    MessageStatus, OpportunityKind, OpportunityScore, Sentiment, SentimentLabel,
};
pub use typing::{others_typing, TypingMap, TypingState};
pub use validation::{
    validate_message_text, ValidationError, DASHBOARD_CACHE_TTL, MAX_BATCH_SIZE,
    MAX_MESSAGE_LENGTH, SEARCH_DEBOUNCE, TYPING_TIMEOUT,
};
