//! Client configuration with environment overrides.

use std::time::Duration;

use parley_protocol::{
    DASHBOARD_CACHE_TTL, MAX_BATCH_SIZE, MAX_MESSAGE_LENGTH, SEARCH_DEBOUNCE, TYPING_TIMEOUT,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Longest message body accepted by `Outbox::stage`, in characters.
    pub max_message_length: usize,
    /// Largest batch `ConversationBatch` will submit.
    pub batch_limit: usize,
    pub typing_timeout_ms: u64,
    pub search_debounce_ms: u64,
    pub dashboard_ttl_secs: u64,
    /// Minimum gap between two real-time dashboard callbacks.
    pub dashboard_throttle_ms: u64,
    /// How many recent messages a feed listens to.
    pub message_window: usize,
    pub opportunity_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_message_length: MAX_MESSAGE_LENGTH,
            batch_limit: MAX_BATCH_SIZE,
            typing_timeout_ms: millis(TYPING_TIMEOUT),
            search_debounce_ms: millis(SEARCH_DEBOUNCE),
            dashboard_ttl_secs: DASHBOARD_CACHE_TTL.as_secs(),
            dashboard_throttle_ms: 1_000,
            message_window: 50,
            opportunity_limit: 20,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `PARLEY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `PARLEY_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        override_with(&lookup, "PARLEY_MAX_MESSAGE_LENGTH", &mut config.max_message_length)?;
        override_with(&lookup, "PARLEY_BATCH_LIMIT", &mut config.batch_limit)?;
        override_with(&lookup, "PARLEY_TYPING_TIMEOUT_MS", &mut config.typing_timeout_ms)?;
        override_with(&lookup, "PARLEY_SEARCH_DEBOUNCE_MS", &mut config.search_debounce_ms)?;
        override_with(&lookup, "PARLEY_DASHBOARD_TTL_SECS", &mut config.dashboard_ttl_secs)?;
        override_with(
            &lookup,
            "PARLEY_DASHBOARD_THROTTLE_MS",
            &mut config.dashboard_throttle_ms,
        )?;
        override_with(&lookup, "PARLEY_MESSAGE_WINDOW", &mut config.message_window)?;
        override_with(&lookup, "PARLEY_OPPORTUNITY_LIMIT", &mut config.opportunity_limit)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("batch_limit", self.batch_limit as u64, 1, MAX_BATCH_SIZE as u64)?;
        check_range(
            "max_message_length",
            self.max_message_length as u64,
            1,
            MAX_MESSAGE_LENGTH as u64,
        )?;
        check_range("typing_timeout_ms", self.typing_timeout_ms, 1, u64::MAX)?;
        check_range("search_debounce_ms", self.search_debounce_ms, 1, u64::MAX)?;
        check_range("message_window", self.message_window as u64, 1, u64::MAX)?;
        Ok(())
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn dashboard_ttl(&self) -> Duration {
        Duration::from_secs(self.dashboard_ttl_secs)
    }

    pub fn dashboard_throttle(&self) -> Duration {
        Duration::from_millis(self.dashboard_throttle_ms)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn override_with<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_protocol_limits() {
        let config = ClientConfig::default();
        assert_eq!(config.batch_limit, 500);
        assert_eq!(config.max_message_length, 1000);
        assert_eq!(config.typing_timeout(), Duration::from_secs(3));
        assert_eq!(config.search_debounce(), Duration::from_millis(300));
        assert_eq!(config.dashboard_ttl(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("PARLEY_BATCH_LIMIT", "100"),
            ("PARLEY_TYPING_TIMEOUT_MS", " 1500 "),
        ]))
        .unwrap();
        assert_eq!(config.batch_limit, 100);
        assert_eq!(config.typing_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn batch_limit_cannot_exceed_platform_ceiling() {
        let err = ClientConfig::from_lookup(lookup(&[("PARLEY_BATCH_LIMIT", "501")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { value: 501, .. }));
    }

    #[test]
    fn unparsable_values_are_reported() {
        let err =
            ClientConfig::from_lookup(lookup(&[("PARLEY_MESSAGE_WINDOW", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PARLEY_MESSAGE_WINDOW".to_string(),
                value: "lots".to_string()
            }
        );
    }

    #[test]
    fn millis_saturates_instead_of_wrapping() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn deserializes_partial_config_with_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"batch_limit": 50}"#).unwrap();
        assert_eq!(config.batch_limit, 50);
        assert_eq!(config.message_window, 50);
    }
}
