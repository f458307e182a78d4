use std::str::FromStr;
use std::time::Duration;

use recetas_types::Message;

use crate::error::ConfigError;

/// Tunables for one chat conversation.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Messages fetched by the initial historical load
    pub history_limit: u32,

    /// How long a peer stays "typing" after its last announcement
    pub typing_ttl: Duration,

    /// Minimum spacing between the local user's own typing announcements
    pub announce_interval: Duration,

    pub max_content_chars: usize,

    /// Table whose inserts feed the conversation
    pub message_table: String,

    /// Broadcast channel carrying typing announcements
    pub typing_channel: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            typing_ttl: Duration::from_secs(2),
            announce_interval: Duration::from_secs(1),
            max_content_chars: Message::MAX_CONTENT_CHARS,
            message_table: "mensajes".to_string(),
            typing_channel: "typing-channel".to_string(),
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `RECETAS_CHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(limit) = parse(&lookup, "RECETAS_CHAT_HISTORY_LIMIT")? {
            config.history_limit = limit;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "RECETAS_CHAT_TYPING_TTL_MS")? {
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: "RECETAS_CHAT_TYPING_TTL_MS",
                    value: ms.to_string(),
                });
            }
            config.typing_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "RECETAS_CHAT_ANNOUNCE_INTERVAL_MS")? {
            config.announce_interval = Duration::from_millis(ms);
        }
        if let Some(max) = parse(&lookup, "RECETAS_CHAT_MAX_CONTENT_CHARS")? {
            config.max_content_chars = max;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(None),
    }
}
