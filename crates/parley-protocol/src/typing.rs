//! Ephemeral typing presence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingState {
    pub is_typing: bool,
    pub updated_at: DateTime<Utc>,
}

/// Everyone currently typing in one conversation, keyed by user.
pub type TypingMap = BTreeMap<UserId, TypingState>;

/// Copy of `map` without `viewer`'s own entry and without stale `false` rows.
pub fn others_typing(map: &TypingMap, viewer: &UserId) -> TypingMap {
    map.iter()
        .filter(|(user, state)| *user != viewer && state.is_typing)
        .map(|(user, state)| (user.clone(), *state))
        .collect()
}
