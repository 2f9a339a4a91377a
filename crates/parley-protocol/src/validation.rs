//! Limits and input checks applied before any I/O.

use std::time::Duration;

use thiserror::Error;

/// Longest accepted message body, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Ceiling on documents touched by one atomic batched write.
pub const MAX_BATCH_SIZE: usize = 500;

pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

pub const DASHBOARD_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message text cannot be empty")]
    EmptyText,
    #[error("message is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },
}

/// Trim `text` and check it against `max` characters.
pub fn validate_message_text(text: &str, max: usize) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = trimmed.chars().count();
    if len > max {
        return Err(ValidationError::TooLong { len, max });
    }
    Ok(trimmed)
}
