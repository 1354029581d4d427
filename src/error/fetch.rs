//! Image download error types.

/// Kinds of fetch errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum FetchErrorKind {
    /// URL is not an acceptable CDN attachment URL
    #[display("Not a CDN attachment URL: {}", _0)]
    InvalidUrl(String),
    /// Download failed after all retries
    #[display("Download failed: {}", _0)]
    Download(String),
    /// Response content-type is not an image
    #[display("Unexpected content type: {}", _0)]
    NotAnImage(String),
    /// Per-attempt deadline elapsed
    #[display("Download timed out after {}s", _0)]
    Timeout(u64),
}

/// Fetch error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Fetch Error: {} at line {} in {}", kind, line, file)]
pub struct FetchError {
    /// The kind of error that occurred
    pub kind: FetchErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl FetchError {
    /// Create a new fetch error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: FetchErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}

impl crate::rate_limit::RetryableError for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Download(_) | FetchErrorKind::Timeout(_)
        )
    }
}
