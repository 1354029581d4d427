//! Generation workflow: outcome classification and upscale correlation.
//!
//! A generation starts with a slash command, waits for the provider's
//! grid reply, and classifies everything the provider does into one of
//! the terminal outcomes. After the grid, four upscale requests run in
//! parallel and each variant's reply is correlated back to this grid.

mod context;
mod correlation;
mod machine;

pub use context::{GenerationContext, GenerationStatus, GridInfo, ProcessedSet};
pub use correlation::{correlate_variant, CorrelationRequest};
pub use machine::{classify, progress_percent, Classification, ClassifyInput, GenerationDriver};
