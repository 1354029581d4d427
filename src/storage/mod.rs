//! Artifact persistence.
//!
//! Storage backends persist image bytes plus the metadata that proves an
//! upscale belongs to its grid. Every upscale record carries the grid
//! message id; that back-reference is the durable proof of correlation.

mod filesystem;
mod memory;

pub use filesystem::FileSystemStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::ArtifactKind;
use crate::snowflake::Snowflake;

/// Metadata saved alongside artifact bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Grid or upscale
    pub kind: ArtifactKind,
    /// The prompt as submitted
    pub prompt: String,
    /// The grid this artifact belongs to
    pub grid_message_id: Snowflake,
    /// The message the artifact was attached to
    #[serde(default)]
    pub message_id: Option<Snowflake>,
    /// Zero-based variant index for upscales
    #[serde(default)]
    pub variant_index: Option<u8>,
    /// CDN URL the bytes came from
    pub source_url: String,
    /// MIME type reported by the CDN
    #[serde(default)]
    pub mime: String,
}

impl From<&crate::model::Artifact> for ArtifactMetadata {
    fn from(artifact: &crate::model::Artifact) -> Self {
        Self {
            kind: artifact.kind,
            prompt: artifact.prompt.clone(),
            grid_message_id: artifact.grid_message_id,
            message_id: None,
            variant_index: artifact.variant_index,
            source_url: artifact.source_url.clone(),
            mime: artifact.mime.clone(),
        }
    }
}

/// One per-variant entry of the consolidated generation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleEntry {
    /// Zero-based variant index
    pub variant: u8,
    /// Whether the variant resolved with an image
    pub success: bool,
    /// Stored filename, empty on failure
    #[serde(default)]
    pub image_file: String,
    /// Back-reference proving correlation
    pub grid_message_id: Snowflake,
}

/// Contract shared by the concrete storage variants.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Persist a grid image and its metadata; opens a new generation
    /// group. Returns the storage id of the saved image.
    async fn save_grid(&self, data: &[u8], meta: &ArtifactMetadata)
        -> Result<String, StorageError>;

    /// Persist an upscale image and its metadata under the current
    /// generation group. The metadata's `grid_message_id` is recorded in
    /// the consolidated generation file.
    async fn save_upscale(
        &self,
        data: &[u8],
        meta: &ArtifactMetadata,
    ) -> Result<String, StorageError>;

    /// Upsert a per-variant entry into a generation's consolidated
    /// record, keyed by variant index.
    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: &UpscaleEntry,
    ) -> Result<(), StorageError>;

    /// Load bytes and metadata back by storage id.
    async fn load(&self, storage_id: &str) -> Result<(Vec<u8>, ArtifactMetadata), StorageError>;

    /// Id of the generation group opened by the last `save_grid`.
    async fn current_generation(&self) -> Option<String>;
}
