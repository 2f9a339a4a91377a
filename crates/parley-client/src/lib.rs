//! Parley Client - the state core behind a chat UI
//!
//! This crate provides:
//! - `Outbox` / `ChatSession`: optimistic send with server reconciliation
//! - `MessageFeed` and `Subscription`: real-time snapshot listeners
//! - `TypingPublisher` / `TypingHub`: debounced typing presence
//! - `ConversationBatch` and `ConversationService`: conversation mutations
//! - `DashboardService`: aggregated metrics with a local cache fallback
//!
//! Every remote dependency is reached through the traits in `parley-store`,
//! so the same controllers run against in-memory backends in tests.

pub mod batch;
pub mod config;
pub mod conversations;
pub mod dashboard;
pub mod debounce;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod outbox;
pub mod reconcile;
pub mod search;
pub mod session;
pub mod subscription;
pub mod typing;
pub mod view;

pub use batch::ConversationBatch;
pub use config::ClientConfig;
pub use conversations::ConversationService;
pub use dashboard::{CachedOpportunities, CachedSummary, DashboardCache, DashboardService, DashboardView};
pub use debounce::{throttle, Debouncer, TimerSlot};
pub use error::{BatchError, ClientError, ClientResult, ConfigError, SendError};
pub use feed::MessageFeed;
pub use outbox::{Outbox, SendOutcome};
pub use reconcile::{merge, LocalEntry, LocalState, ViewState};
pub use search::{search_messages, MessageSearch};
pub use session::ChatSession;
pub use subscription::Subscription;
pub use typing::{set_typing, subscribe_to_typing, TypingHub, TypingPublisher};
pub use view::SharedView;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::error::{BatchError, ClientError, ClientResult, SendError};
    pub use crate::outbox::SendOutcome;
    pub use crate::session::ChatSession;
    pub use crate::subscription::Subscription;
    pub use parley_protocol::{ConversationId, Message, MessageId, MessageStatus, UserId};
}
