//! Parley Store - abstractions over the collaborators the client core talks to
//!
//! This crate provides:
//! - `MessageStore` / `ConversationStore` traits for the remote document store
//! - `PresenceStore` for the low-latency typing channel
//! - `LocalCache` for on-device persistence (in-memory and file-backed)
//! - `SummarySource` for precomputed dashboard aggregates
//! - `ChannelRegistry`, the keyed snapshot channels the in-memory backends use

pub mod aggregate;
pub mod cache;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod message;
pub mod presence;
pub mod registry;

pub use aggregate::{StaticSummarySource, SummarySource};
pub use cache::{FileCache, InMemoryCache, LocalCache};
pub use conversation::ConversationStore;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use message::MessageStore;
pub use presence::{InMemoryPresenceStore, PresenceStore};
pub use registry::{ChannelRegistry, SnapshotStream};

/// Prelude for common imports
pub mod prelude {
    pub use crate::aggregate::SummarySource;
    pub use crate::cache::LocalCache;
    pub use crate::conversation::ConversationStore;
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::message::MessageStore;
    pub use crate::presence::PresenceStore;
    pub use crate::registry::SnapshotStream;
}
