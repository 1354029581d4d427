//! Generation outcome error types.
//!
//! The provider answers a generation request in one of several terminal
//! ways besides the happy path. Each gets its own kind so callers can
//! distinguish moderation flavors from capacity problems. Every error
//! carries the normalized prompt fingerprint, the triggering message id
//! when one exists, and the elapsed time since the interaction was sent.

use std::time::Duration;

use crate::snowflake::Snowflake;

/// Kinds of generation errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum GenerationErrorKind {
    /// Prompt was rejected before any message appeared in the channel
    #[display("Prompt pre-moderated: no provider reply")]
    PreModeration,
    /// Generation started but the provider stopped it
    #[display("Generation stopped by provider moderation")]
    PostModeration,
    /// The tracked message was deleted after appearing
    #[display("Generation message deleted by provider moderation")]
    EphemeralModeration,
    /// The interaction was rejected outright
    #[display("Invalid request (status {}): {}", status, body)]
    InvalidRequest {
        /// HTTP status of the rejected interaction
        status: u16,
        /// Moderation body returned by the provider
        body: String,
    },
    /// The provider queue is full; retry later
    #[display("Provider queue is full")]
    QueueFull,
    /// The job was queued behind account limits
    #[display("Job queued by provider")]
    JobQueued,
    /// Network failure that outlived the transport's retries
    #[display("Transient network failure: {}", _0)]
    TransientNetwork(String),
    /// A per-call deadline elapsed
    #[display("Deadline elapsed during {}", _0)]
    Deadline(String),
    /// A variant's upscale reply never arrived
    #[display("No upscale reply for variant {}", _0)]
    Correlation(u8),
    /// The client was closed while the operation was pending
    #[display("Operation cancelled")]
    Cancelled,
}

/// Generation error carrying correlation context and source location.
///
/// # Examples
///
/// ```
/// use vermeer::{GenerationError, GenerationErrorKind};
///
/// let err = GenerationError::new(GenerationErrorKind::QueueFull, "a cat")
///     .with_elapsed(std::time::Duration::from_secs(3));
/// assert!(format!("{}", err).contains("queue is full"));
/// ```
#[derive(Debug, Clone, derive_more::Error)]
pub struct GenerationError {
    /// The kind of error that occurred
    pub kind: GenerationErrorKind,
    /// Normalized fingerprint of the prompt involved
    pub fingerprint: String,
    /// Message id that triggered the outcome, when one exists
    pub message_id: Option<Snowflake>,
    /// Time elapsed since the interaction was sent
    pub elapsed: Duration,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl GenerationError {
    /// Create a new generation error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GenerationErrorKind, fingerprint: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            fingerprint: fingerprint.into(),
            message_id: None,
            elapsed: Duration::ZERO,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Attach the triggering message id.
    pub fn with_message_id(mut self, id: Snowflake) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Attach the elapsed time since the interaction was sent.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Generation Error: {} (fingerprint \"{}\"",
            self.kind, self.fingerprint
        )?;
        if let Some(id) = &self.message_id {
            write!(f, ", message {}", id)?;
        }
        write!(f, ", after {:.1}s)", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = GenerationError::new(GenerationErrorKind::PostModeration, "cosmic dolphin")
            .with_message_id(Snowflake::from(1234567890u64))
            .with_elapsed(Duration::from_millis(12_500));
        let text = format!("{}", err);
        assert!(text.contains("cosmic dolphin"));
        assert!(text.contains("1234567890"));
        assert!(text.contains("12.5s"));
    }
}
