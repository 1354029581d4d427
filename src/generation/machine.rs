//! Classification of provider responses.
//!
//! Every message event observed during a generation maps to exactly one
//! classification. Precedence, top to bottom: delete of the tracked id,
//! `(Stopped)` suffix, queue indications, `queue is full`, progress
//! updates, completed grid. Interaction rejections (4xx with a
//! moderation body) are classified at the transport boundary before any
//! message exists.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::config::Tuning;
use crate::error::{GenerationError, GenerationErrorKind, HttpErrorKind};
use crate::model::{is_complete_grid, Message};
use crate::observer::{MessageEvent, MessageObserver};
use crate::prompt::content_matches;
use crate::snowflake::Snowflake;
use crate::transport::{CommandOption, InteractionTransport};

use super::context::{GenerationContext, GenerationStatus, GridInfo, ProcessedSet};

/// What one observed event means for the generation.
#[derive(Debug)]
pub enum Classification {
    /// First provider reply for this prompt; begin tracking it
    Track(Snowflake),
    /// The grid is complete: attachment plus all four upscale buttons
    GridReady(Box<Message>),
    /// Progress update while the provider renders
    Progress {
        /// Percent complete
        percent: u8,
        /// Message carrying the update
        message_id: Snowflake,
    },
    /// A terminal outcome
    Terminal {
        /// Which terminal outcome
        kind: GenerationErrorKind,
        /// Message that triggered it, when one exists
        message_id: Option<Snowflake>,
    },
    /// Not about this generation
    Irrelevant,
}

/// Inputs the classifier needs besides the event itself.
#[derive(Debug)]
pub struct ClassifyInput<'a> {
    /// Message currently being tracked, if any
    pub tracked: Option<Snowflake>,
    /// Normalized prompt fingerprint
    pub fingerprint: &'a str,
    /// Ordering boundary: replies older than this belong to a previous
    /// generation and are ignored
    pub not_before: Snowflake,
    /// Ids already consumed by earlier generations or variants
    pub processed: &'a ProcessedSet,
}

/// Classify one event. Total: every event yields exactly one variant.
pub fn classify(input: &ClassifyInput<'_>, event: &MessageEvent) -> Classification {
    let message = match event {
        MessageEvent::Delete(deleted) => {
            return if input.tracked == Some(deleted.id) {
                Classification::Terminal {
                    kind: GenerationErrorKind::EphemeralModeration,
                    message_id: Some(deleted.id),
                }
            } else {
                Classification::Irrelevant
            };
        }
        MessageEvent::Create(m) | MessageEvent::Update(m) => m,
    };

    if !message.from_provider() {
        return Classification::Irrelevant;
    }

    let is_update = matches!(event, MessageEvent::Update(_));
    let is_tracked = input.tracked == Some(message.id);
    let matches_fp = is_tracked || content_matches(&message.content, input.fingerprint);
    let fresh = message.id >= input.not_before && !input.processed.contains(message.id);
    let content = message.content.trim_end();

    if matches_fp && content.ends_with("(Stopped)") {
        return Classification::Terminal {
            kind: GenerationErrorKind::PostModeration,
            message_id: Some(message.id),
        };
    }

    // A fresh reply opens with "(Waiting to start)"; the same suffix on a
    // later edit means the job went to the queue instead of rendering.
    let queued = content.contains("Job queued")
        || (is_update && content.ends_with("(Waiting to start)"));
    if matches_fp && queued {
        return Classification::Terminal {
            kind: GenerationErrorKind::JobQueued,
            message_id: Some(message.id),
        };
    }

    if content.to_lowercase().contains("queue is full") {
        return Classification::Terminal {
            kind: GenerationErrorKind::QueueFull,
            message_id: Some(message.id),
        };
    }

    if matches_fp && (is_tracked || fresh) {
        if let Some(percent) = progress_percent(content) {
            return Classification::Progress {
                percent,
                message_id: message.id,
            };
        }
        if is_complete_grid(message) {
            return Classification::GridReady(Box::new(message.clone()));
        }
        if !is_update && input.tracked.is_none() {
            return Classification::Track(message.id);
        }
    }

    Classification::Irrelevant
}

/// Extract a `(NN%)` progress marker from message content.
pub fn progress_percent(content: &str) -> Option<u8> {
    let close = content.rfind("%)")?;
    let open = content[..close].rfind('(')?;
    let digits = &content[open + 1..close];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|p| *p <= 100)
}

/// Drives one generation to a terminal outcome.
pub struct GenerationDriver {
    /// Interaction transport
    pub transport: Arc<dyn InteractionTransport>,
    /// Channel the generation runs in
    pub channel_id: Snowflake,
    /// Guild the channel belongs to
    pub guild_id: Snowflake,
    /// The user gateway session's id, required on interactions
    pub user_session_id: String,
    /// Timing parameters
    pub tuning: Tuning,
}

impl GenerationDriver {
    /// Send the slash command and classify events until a terminal
    /// outcome. The caller wraps this in the overall `generate` deadline.
    #[instrument(skip(self, observer, ctx, progress), fields(fingerprint = %ctx.fingerprint))]
    pub async fn run(
        &self,
        observer: &MessageObserver,
        ctx: &mut GenerationContext,
        mut progress: Option<&mut dyn FnMut(u8)>,
    ) -> Result<GridInfo, GenerationError> {
        let channel = self.channel_id;
        // Subscribe before sending so no reply can slip past.
        let mut subscription = observer.subscribe(move |event| event.channel_id() == channel);

        let started = Instant::now();
        let not_before = Snowflake::from_unix_ms(
            unix_ms_now().saturating_sub(self.tuning.clock_skew.as_millis() as u64),
        );

        let options = [CommandOption::new("prompt", ctx.prompt.clone())];
        let send_result = self
            .transport
            .send_slash_command(
                self.channel_id,
                self.guild_id,
                "imagine",
                &options,
                &self.user_session_id,
            )
            .await;

        if let Err(e) = send_result {
            ctx.status = GenerationStatus::Failed;
            let kind = match &e.kind {
                HttpErrorKind::Status { status, body } if (400..500).contains(status) => {
                    GenerationErrorKind::InvalidRequest {
                        status: *status,
                        body: body.clone(),
                    }
                }
                _ => GenerationErrorKind::TransientNetwork(e.to_string()),
            };
            return Err(GenerationError::new(kind, &ctx.fingerprint)
                .with_elapsed(started.elapsed()));
        }
        ctx.status = GenerationStatus::AwaitingGrid;

        let pre_deadline = tokio::time::sleep(self.tuning.pre_moderation_window);
        tokio::pin!(pre_deadline);

        loop {
            tokio::select! {
                _ = &mut pre_deadline, if ctx.grid_message_id.is_none() => {
                    ctx.status = GenerationStatus::Failed;
                    return Err(GenerationError::new(
                        GenerationErrorKind::PreModeration,
                        &ctx.fingerprint,
                    )
                    .with_elapsed(started.elapsed()));
                }
                event = subscription.recv() => {
                    let Some(event) = event else {
                        ctx.status = GenerationStatus::Failed;
                        return Err(GenerationError::new(
                            GenerationErrorKind::Cancelled,
                            &ctx.fingerprint,
                        )
                        .with_elapsed(started.elapsed()));
                    };
                    let input = ClassifyInput {
                        tracked: ctx.grid_message_id,
                        fingerprint: &ctx.fingerprint,
                        not_before,
                        processed: &ctx.processed,
                    };
                    match classify(&input, &event) {
                        Classification::Track(id) => {
                            debug!(message_id = %id, "Tracking provider reply");
                            ctx.processed.claim(id);
                            ctx.grid_message_id = Some(id);
                            ctx.status = GenerationStatus::Grid;
                        }
                        Classification::Progress { percent, .. } => {
                            info!(percent, "Generation progress");
                            if let Some(cb) = progress.as_mut() {
                                cb(percent);
                            }
                        }
                        Classification::GridReady(message) => {
                            ctx.processed.claim(message.id);
                            ctx.grid_message_id = Some(message.id);
                            ctx.status = GenerationStatus::Complete;
                            let image_url = message
                                .first_attachment_url()
                                .unwrap_or_default()
                                .to_string();
                            info!(grid = %message.id, "Grid complete");
                            return Ok(GridInfo {
                                message_id: message.id,
                                channel_id: message.channel_id,
                                fingerprint: ctx.fingerprint.clone(),
                                prompt: ctx.prompt.clone(),
                                image_url,
                            });
                        }
                        Classification::Terminal { kind, message_id } => {
                            ctx.status = GenerationStatus::Failed;
                            let mut err = GenerationError::new(kind, &ctx.fingerprint)
                                .with_elapsed(started.elapsed());
                            if let Some(id) = message_id {
                                err = err.with_message_id(id);
                            }
                            return Err(err);
                        }
                        Classification::Irrelevant => {}
                    }
                }
            }
        }
    }
}

fn unix_ms_now() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
