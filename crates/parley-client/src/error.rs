//! Error types for the client controllers

use parley_protocol::{ConversationError, IdError, MessageId, ValidationError};
use parley_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the send path. Remote failures are not among them:
/// those end up as a `failed` message status instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Message {0} is not a failed local message and cannot be retried")]
    NotRetryable(MessageId),

    #[error("Unknown local message: {0}")]
    UnknownMessage(MessageId),
}

/// Errors surfaced by batched archive/delete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("No conversations provided")]
    Empty,

    #[error("Cannot process more than {limit} conversations at once (got {count})")]
    TooLarge { count: usize, limit: usize },

    #[error("You do not have permission to modify one or more of these conversations")]
    Forbidden,

    #[error("Failed to update conversations. Please try again.")]
    Failed(#[source] StoreError),
}

impl BatchError {
    /// Whether offering a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::Failed(_))
    }
}

impl From<StoreError> for BatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PermissionDenied(_) => BatchError::Forbidden,
            StoreError::BatchTooLarge { count, limit } => BatchError::TooLarge { count, limit },
            other => BatchError::Failed(other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("{key} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: String,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Umbrella error for controller operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ClientError::Store(err) if err.is_permission_denied())
    }
}

/// Result type for controller operations
pub type ClientResult<T> = Result<T, ClientError>;
