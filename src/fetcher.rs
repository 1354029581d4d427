//! Artifact byte download.
//!
//! Grid and upscale images live on the provider's CDN. The fetcher
//! validates the URL shape before touching the network, retries transient
//! failures, and verifies the response is actually an image.

use std::time::Duration;

use reqwest::Client;
use tokio_retry2::strategy::ExponentialBackoff;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, instrument, warn};

use crate::error::{FetchError, FetchErrorKind};
use crate::rate_limit::RetryableError;

/// CDN hosts attachments are served from.
const CDN_HOSTS: &[&str] = &[
    "https://cdn.discordapp.com/",
    "https://media.discordapp.net/",
];

/// Accepted image file extensions.
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// Downloads image bytes from the CDN.
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    attempts: usize,
    attempt_timeout: Duration,
}

impl Default for ImageFetcher {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

impl ImageFetcher {
    /// Fetcher with the given retry count and per-attempt deadline.
    pub fn new(attempts: usize, attempt_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            attempts: attempts.max(1),
            attempt_timeout,
        }
    }

    /// Download an image, returning its bytes and MIME type.
    ///
    /// # Errors
    ///
    /// [`FetchErrorKind::InvalidUrl`] for non-CDN URLs before any network
    /// traffic; [`FetchErrorKind::NotAnImage`] when the response is not
    /// `image/*`; [`FetchErrorKind::Download`] after retries run out.
    #[instrument(skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<(Vec<u8>, String), FetchError> {
        validate_cdn_url(url)?;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(10))
            .take(self.attempts - 1);

        Retry::spawn(strategy, || async {
            match self.fetch_once(url).await {
                Ok(result) => Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!(url, error = %e, "Download attempt failed, will retry");
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => Err(RetryError::Permanent(e)),
            }
        })
        .await
    }

    async fn fetch_once(&self, url: &str) -> Result<(Vec<u8>, String), FetchError> {
        let response = tokio::time::timeout(self.attempt_timeout, async {
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::new(FetchErrorKind::Download(e.to_string())))
        })
        .await
        .map_err(|_| {
            FetchError::new(FetchErrorKind::Timeout(self.attempt_timeout.as_secs()))
        })??;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(FetchErrorKind::Download(format!(
                "status {status}"
            ))));
        }

        let mime = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !mime.starts_with("image/") {
            return Err(FetchError::new(FetchErrorKind::NotAnImage(mime)));
        }

        let bytes = tokio::time::timeout(self.attempt_timeout, response.bytes())
            .await
            .map_err(|_| FetchError::new(FetchErrorKind::Timeout(self.attempt_timeout.as_secs())))?
            .map_err(|e| FetchError::new(FetchErrorKind::Download(e.to_string())))?;

        debug!(url, size = bytes.len(), mime = %mime, "Downloaded artifact");
        Ok((bytes.to_vec(), mime))
    }
}

/// Validate that a URL is a CDN attachment URL with an image extension.
pub fn validate_cdn_url(url: &str) -> Result<(), FetchError> {
    if !CDN_HOSTS.iter().any(|host| url.starts_with(host)) {
        return Err(FetchError::new(FetchErrorKind::InvalidUrl(url.to_string())));
    }
    if !url.contains("/attachments/") {
        return Err(FetchError::new(FetchErrorKind::InvalidUrl(url.to_string())));
    }
    let path_end = url.split('?').next().unwrap_or(url).to_lowercase();
    if !IMAGE_EXTENSIONS.iter().any(|ext| path_end.ends_with(ext)) {
        return Err(FetchError::new(FetchErrorKind::InvalidUrl(url.to_string())));
    }
    Ok(())
}
