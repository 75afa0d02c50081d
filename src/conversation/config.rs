//! Conversation handler configuration

use super::error::ConfigError;
use std::time::Duration;

/// Construction-time options, fixed for the handler's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Used in log fields
    pub name: String,
    /// Let entry points restart a conversation that is already running
    pub allow_reentry: bool,
    /// Upper bound on waiting for a pending state
    pub pending_timeout: Option<Duration>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            name: "conversation".to_string(),
            allow_reentry: false,
            pending_timeout: None,
        }
    }
}

impl ConversationConfig {
    /// Read `CONVERSATION_NAME`, `CONVERSATION_ALLOW_REENTRY` and
    /// `CONVERSATION_PENDING_TIMEOUT_MS`; unset variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_over(Self::default())
    }

    /// Like [`from_env`](Self::from_env), with unset variables taken from `defaults`
    pub fn from_env_over(defaults: Self) -> Result<Self, ConfigError> {
        Self::from_lookup(defaults, |var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        defaults: Self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = defaults;

        if let Some(name) = lookup("CONVERSATION_NAME") {
            config.name = name;
        }

        if let Some(value) = lookup("CONVERSATION_ALLOW_REENTRY") {
            config.allow_reentry = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(invalid("CONVERSATION_ALLOW_REENTRY", value)),
            };
        }

        if let Some(value) = lookup("CONVERSATION_PENDING_TIMEOUT_MS") {
            let millis: u64 = value
                .trim()
                .parse()
                .map_err(|_| invalid("CONVERSATION_PENDING_TIMEOUT_MS", value.clone()))?;
            config.pending_timeout = Some(Duration::from_millis(millis));
        }

        Ok(config)
    }
}

fn invalid(var: &str, value: String) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        value,
    }
}
