//! Identifier types shared by every Parley crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier cannot be empty")]
    Empty,
    #[error("a direct conversation needs two distinct participants, got {0} twice")]
    SameParticipant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(id))
    }

    /// Id of the direct conversation between `a` and `b`.
    ///
    /// The two user ids are sorted before joining, so the result does not
    /// depend on argument order.
    pub fn direct(a: &UserId, b: &UserId) -> Result<Self, IdError> {
        if a == b {
            return Err(IdError::SameParticipant(a.to_string()));
        }
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{first}_{second}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ConversationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token for a message that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(Uuid);

impl ClientToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "temp_{}", self.0.simple())
    }
}

/// Message identifier: a local token until the store assigns a remote id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MessageId {
    Local(ClientToken),
    Remote(String),
}

impl MessageId {
    pub fn remote(id: impl Into<String>) -> Self {
        Self::Remote(id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn token(&self) -> Option<ClientToken> {
        match self {
            Self::Local(token) => Some(*token),
            Self::Remote(_) => None,
        }
    }

    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(id),
        }
    }
}

impl From<ClientToken> for MessageId {
    fn from(token: ClientToken) -> Self {
        Self::Local(token)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(token) => write!(f, "{token}"),
            Self::Remote(id) => write!(f, "{id}"),
        }
    }
}
