//! Rate limiting for the provider's HTTP API.
//!
//! The API advertises per-endpoint quota through `X-RateLimit-*` response
//! headers and additionally expects a minimum spacing between calls from
//! unofficial clients. [`RateLimiter`] enforces both and layers retry with
//! exponential backoff on top.

mod bucket;
mod limiter;

pub use bucket::{retry_after_header, EndpointBucket};
pub use limiter::RateLimiter;

use std::time::Duration;

/// Trait for errors that can be classified as retryable or permanent.
///
/// Transient failures (5xx, 429, connection errors) return true and are
/// retried with backoff; permanent failures (4xx) fail immediately.
pub trait RetryableError {
    /// Returns true if this error should trigger a retry.
    fn is_retryable(&self) -> bool;

    /// Server-mandated delay before the next attempt, if the error
    /// carried one (`Retry-After`). Honored verbatim over the backoff
    /// schedule.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
