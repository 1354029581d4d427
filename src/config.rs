//! Client configuration from the process environment.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::{ConfigError, ConfigErrorKind};
use crate::snowflake::Snowflake;

/// Credentials and channel coordinates for one client instance.
///
/// Immutable once constructed. Two tokens are required because only a real
/// user identity may send interactions, while the bot identity receives
/// the richer event payloads; the two may hold the same value.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User account token (sends interactions)
    pub user_token: String,
    /// Bot account token (receives full event payloads)
    pub bot_token: String,
    /// Channel to operate in
    pub channel_id: Snowflake,
    /// Guild the channel belongs to
    pub guild_id: Snowflake,
    /// Accepted for interface compatibility; the core ignores it
    pub mongodb_uri: Option<String>,
}

impl ClientConfig {
    /// Read configuration from the environment keys
    /// `DISCORD_USER_TOKEN`, `DISCORD_BOT_TOKEN`, `DISCORD_CHANNEL_ID`,
    /// `DISCORD_GUILD_ID`, and optionally `MONGODB_URI`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first missing or malformed key.
    pub fn from_env() -> Result<Self, ConfigError> {
        let user_token = require("DISCORD_USER_TOKEN")?;
        let bot_token = require("DISCORD_BOT_TOKEN")?;
        let channel_id = require_snowflake("DISCORD_CHANNEL_ID")?;
        let guild_id = require_snowflake("DISCORD_GUILD_ID")?;
        let mongodb_uri = env::var("MONGODB_URI").ok().filter(|s| !s.is_empty());

        if mongodb_uri.is_some() {
            warn!("MONGODB_URI is set but document storage is not built in; ignoring");
        }

        Ok(Self {
            user_token,
            bot_token,
            channel_id,
            guild_id,
            mongodb_uri,
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::new(ConfigErrorKind::MissingKey(key.to_string())))
}

fn require_snowflake(key: &str) -> Result<Snowflake, ConfigError> {
    let raw = require(key)?;
    raw.parse().map_err(|_| {
        ConfigError::new(ConfigErrorKind::InvalidValue {
            key: key.to_string(),
            reason: format!("not a snowflake id: {raw}"),
        })
    })
}

/// Tunable timing parameters with the defaults the protocol calls for.
///
/// Tests shrink these to keep wall-clock time down; production code uses
/// [`Tuning::default`].
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Gateway endpoint to connect both sessions to
    pub gateway_url: String,
    /// Refresh slash-command coordinates during `initialize`
    pub refresh_commands_on_init: bool,
    /// Global minimum spacing between any two API calls
    pub min_request_interval: Duration,
    /// Window in which the provider must post a first reply before the
    /// prompt counts as pre-moderated
    pub pre_moderation_window: Duration,
    /// Per-variant upscale correlation timeout
    pub upscale_timeout: Duration,
    /// Overall `generate` deadline
    pub generate_deadline: Duration,
    /// Overall `upscale_all` deadline
    pub upscale_all_deadline: Duration,
    /// Cap on waiting for both sessions to become ready
    pub ready_timeout: Duration,
    /// Retries for interaction posts and message fetches
    pub max_retries: usize,
    /// Clock-skew allowance when filtering messages by time
    pub clock_skew: Duration,
    /// Grace window of the observer's reorder buffer
    pub reorder_grace: Duration,
    /// Capacity of the observer's message-id dedupe set
    pub dedupe_capacity: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            gateway_url: crate::gateway::DEFAULT_GATEWAY_URL.to_string(),
            refresh_commands_on_init: true,
            min_request_interval: Duration::from_millis(350),
            pre_moderation_window: Duration::from_secs(30),
            upscale_timeout: Duration::from_secs(180),
            generate_deadline: Duration::from_secs(600),
            upscale_all_deadline: Duration::from_secs(240),
            ready_timeout: Duration::from_secs(30),
            max_retries: 5,
            clock_skew: Duration::from_secs(1),
            reorder_grace: Duration::from_secs(2),
            dedupe_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let tuning = Tuning::default();
        assert_eq!(tuning.min_request_interval, Duration::from_millis(350));
        assert_eq!(tuning.pre_moderation_window, Duration::from_secs(30));
        assert_eq!(tuning.upscale_timeout, Duration::from_secs(180));
        assert_eq!(tuning.dedupe_capacity, 10_000);
    }
}
