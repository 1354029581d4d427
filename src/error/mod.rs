//! Error types for the vermeer library.
//!
//! Each domain has its own `XxxErrorKind` enum and an `XxxError` struct that
//! records the source location at the point of construction. Domain errors
//! aggregate into the crate-level [`VermeerError`].

mod config;
mod fetch;
mod gateway;
mod generation;
mod http;
mod storage;

pub use config::{ConfigError, ConfigErrorKind};
pub use fetch::{FetchError, FetchErrorKind};
pub use gateway::{GatewayError, GatewayErrorKind};
pub use generation::{GenerationError, GenerationErrorKind};
pub use http::{HttpError, HttpErrorKind};
pub use storage::{StorageError, StorageErrorKind};

/// Crate-level error variants.
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum VermeerErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Gateway connection or protocol error
    #[from(GatewayError)]
    Gateway(GatewayError),
    /// HTTP transport error
    #[from(HttpError)]
    Http(HttpError),
    /// Generation outcome error
    #[from(GenerationError)]
    Generation(GenerationError),
    /// Artifact storage error
    #[from(StorageError)]
    Storage(StorageError),
    /// Image download error
    #[from(FetchError)]
    Fetch(FetchError),
}

/// Vermeer error with kind discrimination.
///
/// # Examples
///
/// ```
/// use vermeer::{ConfigError, ConfigErrorKind, VermeerError, VermeerResult};
///
/// fn might_fail() -> VermeerResult<()> {
///     Err(ConfigError::new(ConfigErrorKind::MissingKey("DISCORD_USER_TOKEN".into())))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Vermeer Error: {}", _0)]
pub struct VermeerError(Box<VermeerErrorKind>);

impl VermeerError {
    /// Create a new error from a kind.
    pub fn new(kind: VermeerErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &VermeerErrorKind {
        &self.0
    }
}

impl<T> From<T> for VermeerError
where
    T: Into<VermeerErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for vermeer operations.
pub type VermeerResult<T> = std::result::Result<T, VermeerError>;
