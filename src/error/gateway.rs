//! Gateway connection and protocol error types.

/// Close codes the gateway treats as fatal: reconnecting cannot succeed
/// without operator intervention (bad token, bad intents, bad shard).
pub const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Kinds of gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum GatewayErrorKind {
    /// WebSocket connection could not be established
    #[display("Connection failed: {}", _0)]
    ConnectionFailed(String),
    /// Authentication rejected by the gateway (close code 4004)
    #[display("Authentication failed (close code {})", _0)]
    AuthenticationFailed(u16),
    /// Gateway closed with a code that forbids reconnection
    #[display("Fatal gateway close (code {})", _0)]
    FatalClose(u16),
    /// Failed to send a payload over the socket
    #[display("Send failed: {}", _0)]
    SendFailed(String),
    /// Received payload could not be decoded
    #[display("Payload decode failed: {}", _0)]
    Decode(String),
    /// READY was not observed within the allowed window
    #[display("Session did not become ready within {}s", _0)]
    ReadyTimeout(u64),
    /// Session was closed while an operation was pending
    #[display("Session closed")]
    Closed,
}

impl GatewayErrorKind {
    /// Classify a websocket close code per the reconnect policy.
    pub fn from_close_code(code: u16) -> Option<Self> {
        if code == 4004 {
            Some(Self::AuthenticationFailed(code))
        } else if FATAL_CLOSE_CODES.contains(&code) {
            Some(Self::FatalClose(code))
        } else {
            None
        }
    }

    /// Whether this error permits another connection attempt.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailed(_) | Self::FatalClose(_)
        )
    }
}

/// Gateway error with location tracking.
///
/// # Examples
///
/// ```
/// use vermeer::{GatewayError, GatewayErrorKind};
///
/// let err = GatewayError::new(GatewayErrorKind::AuthenticationFailed(4004));
/// assert!(!err.kind.is_recoverable());
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Gateway Error: {} at line {} in {}", kind, line, file)]
pub struct GatewayError {
    /// The kind of error that occurred
    pub kind: GatewayErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl GatewayError {
    /// Create a new gateway error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: GatewayErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
