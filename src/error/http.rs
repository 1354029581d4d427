//! HTTP transport error types.

use std::time::Duration;

/// Kinds of HTTP errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum HttpErrorKind {
    /// Request could not be sent (connection, TLS, timeout)
    #[display("Request failed: {}", _0)]
    Request(String),
    /// Server answered with an error status
    #[display("Status {}: {}", status, body)]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },
    /// Server answered with a success status other than the expected one
    #[display("Expected status {}, got {}", expected, got)]
    UnexpectedStatus {
        /// The status the endpoint contract promises
        expected: u16,
        /// The status actually received
        got: u16,
    },
    /// Response body could not be decoded
    #[display("Response decode failed: {}", _0)]
    Decode(String),
}

/// HTTP error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("HTTP Error: {} at line {} in {}", kind, line, file)]
pub struct HttpError {
    /// The kind of error that occurred
    pub kind: HttpErrorKind,
    /// Server-mandated delay before retrying, from `Retry-After`
    pub retry_after: Option<Duration>,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl HttpError {
    /// Create a new HTTP error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: HttpErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            retry_after: None,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Attach the server's `Retry-After` delay.
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        self.retry_after = delay;
        self
    }

    /// Status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            HttpErrorKind::Status { status, .. } => Some(*status),
            HttpErrorKind::UnexpectedStatus { got, .. } => Some(*got),
            _ => None,
        }
    }
}

impl crate::rate_limit::RetryableError for HttpError {
    fn is_retryable(&self) -> bool {
        match &self.kind {
            HttpErrorKind::Request(_) => true,
            HttpErrorKind::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}
