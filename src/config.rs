//! Runtime configuration.

use std::env;
use std::time::Duration;

const DEFAULT_HISTORY_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_CURSOR: &str = "0";

pub const HISTORY_WAIT_ENV: &str = "CHAT_STREAM_HISTORY_WAIT_MS";
pub const MAX_RECONNECTS_ENV: &str = "CHAT_STREAM_MAX_RECONNECTS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// How long the resume detector waits for history to finish loading.
    pub history_wait: Duration,
    /// Resume dispatches allowed before the session is abandoned.
    pub max_reconnect_attempts: u32,
    /// Cursor value a new-message dispatch resets to.
    pub initial_cursor: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_wait: DEFAULT_HISTORY_WAIT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            initial_cursor: DEFAULT_INITIAL_CURSOR.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from the environment, falling back to defaults for
    /// unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            history_wait: env_u64(HISTORY_WAIT_ENV)
                .map(Duration::from_millis)
                .unwrap_or(defaults.history_wait),
            max_reconnect_attempts: env_u64(MAX_RECONNECTS_ENV)
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.max_reconnect_attempts),
            initial_cursor: defaults.initial_cursor,
        }
    }

    #[must_use]
    pub fn with_history_wait(mut self, history_wait: Duration) -> Self {
        self.history_wait = history_wait;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, max_reconnect_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_reconnect_attempts;
        self
    }

    #[must_use]
    pub fn with_initial_cursor(mut self, initial_cursor: impl Into<String>) -> Self {
        self.initial_cursor = initial_cursor.into();
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let value = env::var(key).ok()?;
    match value.trim().parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable numeric environment value");
            None
        }
    }
}
