//! Configuration error types.

/// Kinds of configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ConfigErrorKind {
    /// A required environment key is missing
    #[display("Missing required environment key: {}", _0)]
    MissingKey(String),
    /// An environment key holds an invalid value
    #[display("Invalid value for {}: {}", key, reason)]
    InvalidValue {
        /// Environment key name
        key: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// Configuration error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Config Error: {} at line {} in {}", kind, line, file)]
pub struct ConfigError {
    /// The kind of error that occurred
    pub kind: ConfigErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl ConfigError {
    /// Create a new configuration error with automatic location tracking.
    #[track_caller]
    pub fn new(kind: ConfigErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
