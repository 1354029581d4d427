//! vermeer: Discord-gateway driver for Midjourney image generation.
//!
//! The provider exposes no first-party API; it is reached by behaving
//! like a regular chat client. This crate sustains two concurrent
//! gateway sessions (user + bot identity), sends slash-command
//! interactions under the platform's rate limits, observes the
//! provider's asynchronous replies, correlates upscale results with
//! their originating grid, and persists image bytes plus metadata.
//!
//! # Architecture
//!
//! - [`MidjourneyClient`] - the facade owning every I/O resource
//! - [`gateway`] - websocket sessions: heartbeat, identify, resume
//! - [`observer`] - merged, deduplicated, ordered message fan-out
//! - [`transport`] - rate-limited typed interactions over HTTPS
//! - [`generation`] - outcome classification and upscale correlation
//! - [`storage`] - artifact persistence with correlation metadata
//!
//! # Example
//!
//! ```no_run
//! use vermeer::{ClientConfig, MidjourneyClient, Tuning};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let client = MidjourneyClient::new(config, Tuning::default());
//!
//! client.initialize().await?;
//! let generation = client.generate("beautiful cosmic space dolphin").await?;
//! if let Some(grid_id) = generation.grid_message_id {
//!     let upscales = client.upscale_all(grid_id).await?;
//!     for upscale in &upscales {
//!         println!("variant {}: {:?}", upscale.variant_index, upscale.image_url);
//!     }
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod cli;
mod client;
mod config;
mod error;
mod fetcher;
pub mod gateway;
pub mod generation;
mod model;
pub mod observer;
pub mod prompt;
pub mod rate_limit;
mod snowflake;
pub mod storage;
pub mod transport;

// Re-export the facade and configuration
pub use client::MidjourneyClient;
pub use config::{ClientConfig, Tuning};

// Re-export error types
pub use error::{
    ConfigError, ConfigErrorKind, FetchError, FetchErrorKind, GatewayError, GatewayErrorKind,
    GenerationError, GenerationErrorKind, HttpError, HttpErrorKind, StorageError,
    StorageErrorKind, VermeerError, VermeerErrorKind, VermeerResult,
};

// Re-export data model types
pub use model::{
    is_complete_grid, upscale_buttons, Artifact, ArtifactKind, Attachment, Author, Component,
    ComponentRow, GenerationResult, Message, MessageReference, UpscaleButton, UpscaleResult,
    IMAGINE_COMMAND_ID, IMAGINE_COMMAND_VERSION, MIDJOURNEY_APPLICATION_ID,
};

// Re-export prompt utilities
pub use prompt::{fingerprint, GenerationOptions};

// Re-export snowflake ids
pub use snowflake::{Snowflake, DISCORD_EPOCH_MS};

// Re-export the fetcher
pub use fetcher::ImageFetcher;

// Re-export storage backends
pub use storage::{ArtifactMetadata, ArtifactStorage, FileSystemStorage, MemoryStorage, UpscaleEntry};

// Re-export CLI types
pub use cli::{Cli, Commands};
