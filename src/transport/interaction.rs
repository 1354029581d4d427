//! HTTPS interaction transport against the provider API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{HttpError, HttpErrorKind};
use crate::model::{Message, IMAGINE_COMMAND_ID, IMAGINE_COMMAND_VERSION, MIDJOURNEY_APPLICATION_ID};
use crate::rate_limit::RateLimiter;
use crate::snowflake::Snowflake;

/// Provider API base URL.
const API_BASE: &str = "https://discord.com/api/v10";

/// User-Agent presented on every request, matching an official client.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One option of a slash command.
#[derive(Debug, Clone)]
pub struct CommandOption {
    /// Option name, e.g. `prompt`
    pub name: String,
    /// String value
    pub value: String,
}

impl CommandOption {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Transport for typed interactions and message lookups.
///
/// Implemented over HTTPS in production ([`DiscordTransport`]) and
/// in-memory under tests.
#[async_trait]
pub trait InteractionTransport: Send + Sync {
    /// POST a type-2 (application command) interaction. The provider
    /// acknowledges with 204 and replies asynchronously in the channel.
    async fn send_slash_command(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        command_name: &str,
        options: &[CommandOption],
        user_session_id: &str,
    ) -> Result<(), HttpError>;

    /// POST a type-3 (message component) interaction: a button click.
    async fn send_button_interaction(
        &self,
        message_id: Snowflake,
        custom_id: &str,
        user_session_id: &str,
    ) -> Result<(), HttpError>;

    /// GET a single message.
    async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<Message, HttpError>;

    /// GET the most recent messages of a channel, newest first.
    async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: usize,
    ) -> Result<Vec<Message>, HttpError>;

    /// Refresh slash-command coordinates from the provider. Backends
    /// with static coordinates keep the default no-op.
    async fn refresh_commands(&self) {}
}

/// Registered slash-command coordinates (id + version).
#[derive(Debug, Clone)]
struct CommandRecord {
    id: String,
    version: String,
}

/// Production transport over the provider's HTTPS API.
///
/// Every request is paced by the shared [`RateLimiter`] under a canonical
/// endpoint template and carries the browser-mimicking header set the
/// provider expects from user-identity requests.
pub struct DiscordTransport {
    client: Client,
    user_token: String,
    bot_token: String,
    guild_id: Snowflake,
    channel_id: Snowflake,
    limiter: RateLimiter,
    max_retries: usize,
    nonce: AtomicU64,
    commands: Arc<RwLock<HashMap<String, CommandRecord>>>,
}

impl DiscordTransport {
    /// Build a transport. Command coordinates start from the known-good
    /// constants; call [`refresh_commands`](Self::refresh_commands) to
    /// update them from the API.
    pub fn new(
        user_token: impl Into<String>,
        bot_token: impl Into<String>,
        guild_id: Snowflake,
        channel_id: Snowflake,
        limiter: RateLimiter,
        max_retries: usize,
    ) -> Self {
        let mut commands = HashMap::new();
        commands.insert(
            "imagine".to_string(),
            CommandRecord {
                id: IMAGINE_COMMAND_ID.to_string(),
                version: IMAGINE_COMMAND_VERSION.to_string(),
            },
        );
        Self {
            client: Client::new(),
            user_token: user_token.into(),
            bot_token: bot_token.into(),
            guild_id,
            channel_id,
            limiter,
            max_retries,
            nonce: AtomicU64::new(1),
            commands: Arc::new(RwLock::new(commands)),
        }
    }

    /// Refresh slash-command coordinates from the application's command
    /// listing. Failure keeps the known-good defaults.
    #[instrument(skip(self))]
    async fn refresh_command_registry(&self) {
        let endpoint = "GET:/applications/{application_id}/commands";
        let url = format!("{API_BASE}/applications/{MIDJOURNEY_APPLICATION_ID}/commands");
        let result = self
            .limiter
            .with_retry(endpoint, self.max_retries, || async {
                let response = self
                    .user_request(self.client.get(&url))
                    .send()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Request(e.to_string())))?;
                self.check_status(endpoint, response, StatusCode::OK)
                    .await?
                    .json::<Vec<Value>>()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Decode(e.to_string())))
            })
            .await;

        match result {
            Ok(listing) => {
                let mut commands = self.commands.write().await;
                for cmd in listing {
                    let (Some(name), Some(id), Some(version)) = (
                        cmd["name"].as_str(),
                        cmd["id"].as_str(),
                        cmd["version"].as_str(),
                    ) else {
                        continue;
                    };
                    commands.insert(
                        name.to_string(),
                        CommandRecord {
                            id: id.to_string(),
                            version: version.to_string(),
                        },
                    );
                }
                debug!(count = commands.len(), "Refreshed slash-command registry");
            }
            Err(e) => {
                warn!(error = %e, "Command refresh failed, keeping known-good defaults");
            }
        }
    }

    /// Header set for user-identity requests (interactions).
    fn user_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.user_token)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("Origin", "https://discord.com")
            .header("X-Discord-Locale", "en-US")
            .header(
                "Referer",
                format!(
                    "https://discord.com/channels/{}/{}",
                    self.guild_id, self.channel_id
                ),
            )
    }

    /// Header set for bot-identity requests (message lookups).
    fn bot_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bot {}", self.bot_token))
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
    }

    /// Check a response against the expected status, folding rate-limit
    /// headers into the bucket and mapping failures to [`HttpError`].
    async fn check_status(
        &self,
        endpoint: &str,
        response: Response,
        expected: StatusCode,
    ) -> Result<Response, HttpError> {
        self.limiter.update(endpoint, response.headers()).await;

        let status = response.status();
        if status == expected {
            return Ok(response);
        }

        let retry_after = crate::rate_limit::retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(512).collect::<String>();

        if status.is_success() {
            return Err(HttpError::new(HttpErrorKind::UnexpectedStatus {
                expected: expected.as_u16(),
                got: status.as_u16(),
            }));
        }
        Err(HttpError::new(HttpErrorKind::Status {
            status: status.as_u16(),
            body,
        })
        .with_retry_after(retry_after))
    }

    fn next_nonce(&self) -> String {
        self.nonce.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[async_trait]
impl InteractionTransport for DiscordTransport {
    async fn refresh_commands(&self) {
        self.refresh_command_registry().await;
    }

    #[instrument(skip(self, options, user_session_id), fields(command = command_name))]
    async fn send_slash_command(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        command_name: &str,
        options: &[CommandOption],
        user_session_id: &str,
    ) -> Result<(), HttpError> {
        let record = {
            let commands = self.commands.read().await;
            commands.get(command_name).cloned().ok_or_else(|| {
                HttpError::new(HttpErrorKind::Request(format!(
                    "unknown slash command: {command_name}"
                )))
            })?
        };

        let payload = json!({
            "type": 2,
            "application_id": MIDJOURNEY_APPLICATION_ID.to_string(),
            "guild_id": guild_id.to_string(),
            "channel_id": channel_id.to_string(),
            "session_id": user_session_id,
            "nonce": self.next_nonce(),
            "data": {
                "version": record.version,
                "id": record.id,
                "name": command_name,
                "type": 1,
                "options": options.iter().map(|o| json!({
                    "type": 3,
                    "name": o.name,
                    "value": o.value,
                })).collect::<Vec<_>>(),
                "attachments": [],
            }
        });

        let endpoint = "POST:/interactions";
        let url = format!("{API_BASE}/interactions");
        self.limiter
            .with_retry(endpoint, self.max_retries, || async {
                let response = self
                    .user_request(self.client.post(&url))
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Request(e.to_string())))?;
                self.check_status(endpoint, response, StatusCode::NO_CONTENT)
                    .await
                    .map(|_| ())
            })
            .await
    }

    #[instrument(skip(self, custom_id, user_session_id), fields(message_id = %message_id))]
    async fn send_button_interaction(
        &self,
        message_id: Snowflake,
        custom_id: &str,
        user_session_id: &str,
    ) -> Result<(), HttpError> {
        let payload = json!({
            "type": 3,
            "application_id": MIDJOURNEY_APPLICATION_ID.to_string(),
            "guild_id": self.guild_id.to_string(),
            "channel_id": self.channel_id.to_string(),
            "session_id": user_session_id,
            "message_id": message_id.to_string(),
            "message_flags": 0,
            "nonce": self.next_nonce(),
            "data": {
                "component_type": 2,
                "custom_id": custom_id,
            }
        });

        let endpoint = "POST:/interactions";
        let url = format!("{API_BASE}/interactions");
        self.limiter
            .with_retry(endpoint, self.max_retries, || async {
                let response = self
                    .user_request(self.client.post(&url))
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Request(e.to_string())))?;
                self.check_status(endpoint, response, StatusCode::NO_CONTENT)
                    .await
                    .map(|_| ())
            })
            .await
    }

    #[instrument(skip(self), fields(channel_id = %channel_id, message_id = %message_id))]
    async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<Message, HttpError> {
        let endpoint = "GET:/channels/{channel_id}/messages/{message_id}";
        let url = format!("{API_BASE}/channels/{channel_id}/messages/{message_id}");
        self.limiter
            .with_retry(endpoint, self.max_retries, || async {
                let response = self
                    .bot_request(self.client.get(&url))
                    .send()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Request(e.to_string())))?;
                self.check_status(endpoint, response, StatusCode::OK)
                    .await?
                    .json::<Message>()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Decode(e.to_string())))
            })
            .await
    }

    #[instrument(skip(self), fields(channel_id = %channel_id, limit))]
    async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: usize,
    ) -> Result<Vec<Message>, HttpError> {
        let endpoint = "GET:/channels/{channel_id}/messages";
        let url = format!("{API_BASE}/channels/{channel_id}/messages?limit={limit}");
        self.limiter
            .with_retry(endpoint, self.max_retries, || async {
                let response = self
                    .bot_request(self.client.get(&url))
                    .send()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Request(e.to_string())))?;
                self.check_status(endpoint, response, StatusCode::OK)
                    .await?
                    .json::<Vec<Message>>()
                    .await
                    .map_err(|e| HttpError::new(HttpErrorKind::Decode(e.to_string())))
            })
            .await
    }
}
