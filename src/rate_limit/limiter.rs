//! Rate limiter implementation using governor and header-fed buckets.
//!
//! Two layers of pacing apply to every call:
//! 1. a global minimum spacing between any two API calls, enforced with a
//!    governor GCRA quota (one cell per interval);
//! 2. per-endpoint buckets tracking the provider's `X-RateLimit-*`
//!    headers, suspending callers while an endpoint's quota is exhausted.
//!
//! [`RateLimiter::with_retry`] adds exponential backoff with jitter for
//! transient failures, honoring `Retry-After` verbatim on 429s.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use rand::Rng;
use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

use super::bucket::EndpointBucket;
use super::RetryableError;

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Backoff base for transient failures.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff cap for transient failures.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Paces calls against the provider API.
///
/// Clone-cheap: clones share the same pacing state.
#[derive(Clone)]
pub struct RateLimiter {
    pacer: Arc<DirectRateLimiter>,
    buckets: Arc<Mutex<HashMap<String, EndpointBucket>>>,
    min_interval: Duration,
}

impl RateLimiter {
    /// Create a limiter with the given global minimum spacing.
    pub fn new(min_interval: Duration) -> Self {
        // One cell per interval; burst of one keeps calls strictly spaced.
        let quota = Quota::with_period(min_interval)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            pacer: Arc::new(GovernorRateLimiter::direct(quota)),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            min_interval,
        }
    }

    /// The configured global minimum spacing.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Suspend until a call to `endpoint` is permitted.
    ///
    /// Waits first for the endpoint's bucket (if its quota is exhausted)
    /// and then for the global spacing quota.
    pub async fn wait(&self, endpoint: &str) {
        let bucket_wait = {
            let buckets = self.buckets.lock().await;
            buckets.get(endpoint).and_then(|b| b.wait_needed())
        };
        if let Some(wait) = bucket_wait {
            warn!(
                endpoint,
                wait_ms = wait.as_millis() as u64,
                "Endpoint quota exhausted, waiting for reset"
            );
            tokio::time::sleep(wait).await;
        }
        self.pacer.until_ready().await;
    }

    /// Fold a response's rate-limit headers into the endpoint's bucket.
    pub async fn update(&self, endpoint: &str, headers: &HeaderMap) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(endpoint.to_string()).or_default();
        bucket.update(headers);
        debug!(
            endpoint,
            remaining = ?bucket.remaining,
            "Updated rate-limit bucket"
        );
    }

    /// Snapshot of an endpoint's bucket, if one has been recorded.
    pub async fn bucket(&self, endpoint: &str) -> Option<EndpointBucket> {
        self.buckets.lock().await.get(endpoint).cloned()
    }

    /// Execute an operation with pacing and automatic retry.
    ///
    /// Each attempt waits on [`wait`](Self::wait) first. Transient errors
    /// (per [`RetryableError`]) retry with exponential backoff from 0.5 s,
    /// doubling to a 30 s cap, plus uniform jitter in `[0, delay/4]`; a
    /// server-supplied `Retry-After` overrides the schedule. Permanent
    /// errors return immediately. Callers bound the overall time with
    /// their own deadline.
    pub async fn with_retry<F, Fut, R, E>(
        &self,
        endpoint: &str,
        max_retries: usize,
        operation: F,
    ) -> Result<R, E>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((BACKOFF_BASE.as_millis() / 2) as u64)
            .max_delay(BACKOFF_CAP)
            .map(quarter_jitter)
            .take(max_retries);

        Retry::spawn(strategy, || async {
            self.wait(endpoint).await;
            match operation().await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(endpoint, error = %e, "Transient error, will retry");
                    let retry_after = e.retry_after();
                    Err(RetryError::Transient {
                        err: e,
                        retry_after,
                    })
                }
                Err(e) => {
                    warn!(endpoint, error = %e, "Permanent error, failing immediately");
                    Err(RetryError::Permanent(e))
                }
            }
        })
        .await
    }
}

/// Add uniform jitter in `[0, d/4]` to a backoff delay.
fn quarter_jitter(d: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=0.25);
    d + Duration::from_secs_f64(d.as_secs_f64() * jitter)
}
