//! Upscale correlation.
//!
//! After a button click the provider posts the upscaled image as a fresh
//! message, and replies for a previous grid may still be streaming in.
//! Each variant therefore runs its own matcher: only messages created
//! after the click (minus clock skew), carrying this grid's fingerprint
//! and a variant marker (or a direct reply reference to the grid), are
//! candidates. The shared processed set arbitrates so a message resolves
//! at most one variant, first claim wins.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{GenerationError, GenerationErrorKind, HttpErrorKind};
use crate::model::{UpscaleButton, UpscaleResult};
use crate::observer::{MessageEvent, MessageObserver};
use crate::prompt::content_matches;
use crate::snowflake::Snowflake;
use crate::transport::InteractionTransport;

use super::context::{GridInfo, ProcessedSet};

/// One variant's correlation job.
pub struct CorrelationRequest {
    /// The grid being upscaled
    pub grid: GridInfo,
    /// The button for this variant
    pub button: UpscaleButton,
    /// User gateway session id for the click
    pub user_session_id: String,
    /// Shared claim set across all four variants
    pub processed: ProcessedSet,
    /// Per-variant timeout
    pub timeout: Duration,
    /// Clock-skew allowance on the creation-time filter
    pub clock_skew: Duration,
}

/// Whether message content names this variant or upscale output.
fn variant_marker(content: &str, variant_label: u8) -> bool {
    content.contains(&format!("Image #{variant_label}"))
        || content.contains(&format!("(U{variant_label})"))
        || content.contains("- Upscaled")
        || content.contains("- Variation")
}

/// Click one upscale button and wait for its reply.
///
/// Always returns a result; a timeout or transport failure resolves this
/// variant with an error and leaves siblings running.
#[instrument(
    skip(transport, observer, request),
    fields(grid = %request.grid.message_id, variant = request.button.variant_index)
)]
pub async fn correlate_variant(
    transport: Arc<dyn InteractionTransport>,
    observer: &MessageObserver,
    request: CorrelationRequest,
) -> UpscaleResult {
    let variant_index = request.button.variant_index;
    let variant_label = variant_index + 1;
    let grid_id = request.grid.message_id;
    let started = Instant::now();

    let not_before = Snowflake::from_unix_ms(
        unix_ms_now().saturating_sub(request.clock_skew.as_millis() as u64),
    );

    // Subscribe before the click: the reply may beat the 204.
    let channel = request.grid.channel_id;
    let fingerprint = request.grid.fingerprint.clone();
    let mut subscription = observer.subscribe(move |event| {
        let MessageEvent::Create(message) = event else {
            return false;
        };
        if message.channel_id != channel
            || !message.from_provider()
            || message.id < not_before
            || message.attachments.is_empty()
        {
            return false;
        }
        let by_reference = message.referenced_message_id() == Some(grid_id);
        let by_content = content_matches(&message.content, &fingerprint)
            && variant_marker(&message.content, variant_label);
        by_reference || by_content
    });

    if let Err(e) = transport
        .send_button_interaction(grid_id, &request.button.custom_id, &request.user_session_id)
        .await
    {
        warn!(error = %e, "Upscale click failed");
        let kind = match &e.kind {
            HttpErrorKind::Status { status, body } if (400..500).contains(status) => {
                GenerationErrorKind::InvalidRequest {
                    status: *status,
                    body: body.clone(),
                }
            }
            _ => GenerationErrorKind::TransientNetwork(e.to_string()),
        };
        return UpscaleResult {
            variant_index,
            grid_message_id: grid_id,
            message_id: None,
            image_url: None,
            error: Some(
                GenerationError::new(kind, &request.grid.fingerprint)
                    .with_elapsed(started.elapsed()),
            ),
        };
    }

    let deadline = tokio::time::sleep(request.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(variant = variant_index, "Upscale correlation timed out");
                return UpscaleResult {
                    variant_index,
                    grid_message_id: grid_id,
                    message_id: None,
                    image_url: None,
                    error: Some(
                        GenerationError::new(
                            GenerationErrorKind::Correlation(variant_index),
                            &request.grid.fingerprint,
                        )
                        .with_elapsed(started.elapsed()),
                    ),
                };
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    return UpscaleResult {
                        variant_index,
                        grid_message_id: grid_id,
                        message_id: None,
                        image_url: None,
                        error: Some(
                            GenerationError::new(
                                GenerationErrorKind::Cancelled,
                                &request.grid.fingerprint,
                            )
                            .with_elapsed(started.elapsed()),
                        ),
                    };
                };
                let MessageEvent::Create(message) = event else { continue };
                // First claim wins; a message id never resolves twice.
                if !request.processed.claim(message.id) {
                    debug!(id = %message.id, "Candidate already claimed by a sibling");
                    continue;
                }
                let image_url = message.first_attachment_url().map(str::to_string);
                info!(
                    variant = variant_index,
                    message = %message.id,
                    "Upscale correlated"
                );
                return UpscaleResult {
                    variant_index,
                    grid_message_id: grid_id,
                    message_id: Some(message.id),
                    image_url,
                    error: None,
                };
            }
        }
    }
}

fn unix_ms_now() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
