//! Per-generation tracking state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::snowflake::Snowflake;

/// Lifecycle of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Created, interaction not yet acknowledged
    Pending,
    /// Interaction acknowledged, waiting for the provider's first reply
    AwaitingGrid,
    /// Provider reply tracked, waiting for completion
    Grid,
    /// Grid complete, upscales in flight
    AwaitingUpscales,
    /// All upscale futures settled
    Complete,
    /// Terminal error
    Failed,
}

/// Message ids already consumed by this client.
///
/// A claimed id is never re-dispatched to the state machine and never
/// resolves a second variant. Shared between the generation driver and
/// all four correlation tasks.
#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    inner: Arc<Mutex<HashSet<Snowflake>>>,
}

impl ProcessedSet {
    /// Fresh empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an id. Returns true exactly once per id; the first caller
    /// wins and later callers must skip the message.
    pub fn claim(&self, id: Snowflake) -> bool {
        self.inner
            .lock()
            .map(|mut set| set.insert(id))
            .unwrap_or(false)
    }

    /// Whether an id has been claimed.
    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }

    /// Number of claimed ids.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Whether no ids are claimed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tracking state for one `generate` call.
#[derive(Debug)]
pub struct GenerationContext {
    /// The prompt as submitted, flags included
    pub prompt: String,
    /// Normalized matching fingerprint
    pub fingerprint: String,
    /// When the interaction was sent
    pub started_at: Instant,
    /// Provider message being tracked, once one matched
    pub grid_message_id: Option<Snowflake>,
    /// Lifecycle state
    pub status: GenerationStatus,
    /// Ids consumed by this generation and its upscales
    pub processed: ProcessedSet,
}

impl GenerationContext {
    /// New context for a prompt; computes the fingerprint.
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let fingerprint = crate::prompt::fingerprint(&prompt);
        Self {
            prompt,
            fingerprint,
            started_at: Instant::now(),
            grid_message_id: None,
            status: GenerationStatus::Pending,
            processed: ProcessedSet::new(),
        }
    }
}

/// The completed grid a set of upscales correlates against.
#[derive(Debug, Clone)]
pub struct GridInfo {
    /// Grid message id
    pub message_id: Snowflake,
    /// Channel the generation ran in
    pub channel_id: Snowflake,
    /// Normalized prompt fingerprint
    pub fingerprint: String,
    /// The prompt as submitted
    pub prompt: String,
    /// Grid image URL
    pub image_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_first_wins() {
        let set = ProcessedSet::new();
        let id = Snowflake::from(42u64);
        assert!(set.claim(id));
        assert!(!set.claim(id));
        assert!(set.contains(id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn context_fingerprints_its_prompt() {
        let ctx = GenerationContext::new("A Red Fox --v 6.1");
        assert_eq!(ctx.fingerprint, "a red fox");
        assert_eq!(ctx.status, GenerationStatus::Pending);
    }
}
