//! Shared fixtures: a deterministic in-memory transport and message
//! builders for provider replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use vermeer::transport::{CommandOption, InteractionTransport};
use vermeer::{
    Attachment, Author, Component, ComponentRow, HttpError, HttpErrorKind, Message,
    MessageReference, Snowflake, DISCORD_EPOCH_MS, MIDJOURNEY_APPLICATION_ID,
};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A unique snowflake whose timestamp is `offset_ms` from now.
pub fn snowflake_at(offset_ms: i64) -> Snowflake {
    let now = Utc::now().timestamp_millis();
    let ts = (now + offset_ms).max(0) as u64;
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & 0x3F_FFFF;
    Snowflake::from(((ts.saturating_sub(DISCORD_EPOCH_MS)) << 22) | seq)
}

/// A provider-authored message in `channel` with the given content.
pub fn provider_message(id: Snowflake, channel: Snowflake, content: &str) -> Message {
    Message {
        id,
        channel_id: channel,
        author: Some(Author {
            id: Snowflake::from(MIDJOURNEY_APPLICATION_ID),
            username: "Midjourney Bot".into(),
            bot: true,
        }),
        content: content.into(),
        timestamp: String::new(),
        attachments: Vec::new(),
        components: Vec::new(),
        flags: None,
        message_reference: None,
    }
}

/// A completed grid: attachment plus all four upscale buttons.
pub fn grid_message(id: Snowflake, channel: Snowflake, prompt: &str) -> Message {
    let mut msg = provider_message(id, channel, &format!("**{prompt}** - <@42> (fast)"));
    msg.attachments.push(Attachment {
        url: "https://cdn.discordapp.com/attachments/1/2/grid.png".into(),
        filename: "grid.png".into(),
        content_type: Some("image/png".into()),
    });
    msg.components.push(ComponentRow {
        component_type: 1,
        components: (1..=4)
            .map(|n| Component {
                component_type: 2,
                label: Some(format!("U{n}")),
                custom_id: Some(format!("MJ::JOB::upsample::{n}::{id}")),
            })
            .collect(),
    });
    msg
}

/// An upscale reply for `variant` (1-based) of `grid`.
pub fn upscale_message(
    id: Snowflake,
    channel: Snowflake,
    prompt: &str,
    variant: u8,
    grid: Option<Snowflake>,
) -> Message {
    let mut msg = provider_message(
        id,
        channel,
        &format!("**{prompt}** - Image #{variant} (574kB)"),
    );
    msg.attachments.push(Attachment {
        url: format!("https://cdn.discordapp.com/attachments/1/2/upscale_{variant}.png"),
        filename: format!("upscale_{variant}.png"),
        content_type: Some("image/png".into()),
    });
    msg.message_reference = grid.map(|g| MessageReference {
        message_id: Some(g),
    });
    msg
}

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Deterministic in-memory transport.
///
/// Records everything sent; optional hooks run synchronously inside the
/// send calls so tests can script the provider's replies.
#[derive(Default)]
pub struct MockTransport {
    /// Prompts submitted via slash commands
    pub commands: Mutex<Vec<String>>,
    /// Custom ids clicked
    pub clicks: Mutex<Vec<String>>,
    /// Messages served by `get_message` / `list_recent_messages`
    pub messages: Mutex<HashMap<Snowflake, Message>>,
    /// Error every slash command returns, when set
    pub command_error: Mutex<Option<HttpError>>,
    /// Runs with the prompt after a slash command is accepted
    pub on_command: Mutex<Option<Hook>>,
    /// Runs with the custom id after a button click is accepted
    pub on_click: Mutex<Option<Hook>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_message(&self, message: Message) {
        self.messages.lock().unwrap().insert(message.id, message);
    }

    pub fn set_command_error(&self, status: u16, body: &str) {
        *self.command_error.lock().unwrap() = Some(HttpError::new(HttpErrorKind::Status {
            status,
            body: body.into(),
        }));
    }

    pub fn set_on_command(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_command.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_on_click(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_click.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl InteractionTransport for MockTransport {
    async fn send_slash_command(
        &self,
        _channel_id: Snowflake,
        _guild_id: Snowflake,
        _command_name: &str,
        options: &[CommandOption],
        _user_session_id: &str,
    ) -> Result<(), HttpError> {
        if let Some(error) = self.command_error.lock().unwrap().clone() {
            return Err(error);
        }
        let prompt = options
            .iter()
            .find(|o| o.name == "prompt")
            .map(|o| o.value.clone())
            .unwrap_or_default();
        self.commands.lock().unwrap().push(prompt.clone());
        if let Some(hook) = self.on_command.lock().unwrap().as_ref() {
            hook(&prompt);
        }
        Ok(())
    }

    async fn send_button_interaction(
        &self,
        _message_id: Snowflake,
        custom_id: &str,
        _user_session_id: &str,
    ) -> Result<(), HttpError> {
        self.clicks.lock().unwrap().push(custom_id.to_string());
        if let Some(hook) = self.on_click.lock().unwrap().as_ref() {
            hook(custom_id);
        }
        Ok(())
    }

    async fn get_message(
        &self,
        _channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<Message, HttpError> {
        self.messages
            .lock()
            .unwrap()
            .get(&message_id)
            .cloned()
            .ok_or_else(|| {
                HttpError::new(HttpErrorKind::Status {
                    status: 404,
                    body: "Unknown Message".into(),
                })
            })
    }

    async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: usize,
    ) -> Result<Vec<Message>, HttpError> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(limit);
        Ok(messages)
    }
}

/// Short timings so tests finish quickly.
pub fn fast_tuning() -> vermeer::Tuning {
    vermeer::Tuning {
        refresh_commands_on_init: false,
        min_request_interval: std::time::Duration::from_millis(1),
        pre_moderation_window: std::time::Duration::from_millis(800),
        upscale_timeout: std::time::Duration::from_millis(800),
        generate_deadline: std::time::Duration::from_secs(10),
        upscale_all_deadline: std::time::Duration::from_secs(10),
        ready_timeout: std::time::Duration::from_secs(2),
        max_retries: 2,
        clock_skew: std::time::Duration::from_secs(1),
        reorder_grace: std::time::Duration::from_millis(40),
        dedupe_capacity: 10_000,
        ..vermeer::Tuning::default()
    }
}
