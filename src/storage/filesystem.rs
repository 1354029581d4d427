//! Filesystem storage backend.
//!
//! Outputs group under a timestamp directory per generation:
//!
//! ```text
//! {base}/20260802_141523/
//! ├── grid_20260802_141523.png
//! ├── grid_20260802_141523.png.meta.json
//! ├── variant_0_20260802_141523.png
//! ├── variant_0_20260802_141523.png.meta.json
//! ├── prompt_20260802_141523.txt
//! └── generation_20260802_141523.json
//! ```
//!
//! Every file is written to a temp path and renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{StorageError, StorageErrorKind};

use super::{ArtifactMetadata, ArtifactStorage, UpscaleEntry};

/// Filesystem storage rooted at a base directory.
pub struct FileSystemStorage {
    base_path: PathBuf,
    current: Mutex<Option<Generation>>,
}

#[derive(Debug, Clone)]
struct Generation {
    timestamp: String,
    dir: PathBuf,
}

impl FileSystemStorage {
    /// Create the backend, making the base directory if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                base_path.display(),
                e
            )))
        })?;
        info!(path = %base_path.display(), "Opened filesystem artifact storage");
        Ok(Self {
            base_path,
            current: Mutex::new(None),
        })
    }

    /// Open a new generation group named after the current local time.
    async fn begin_generation(&self) -> Result<Generation, StorageError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let dir = self.base_path.join(&timestamp);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                dir.display(),
                e
            )))
        })?;
        let generation = Generation { timestamp, dir };
        *self.current.lock().await = Some(generation.clone());
        Ok(generation)
    }

    async fn current_or_err(&self) -> Result<Generation, StorageError> {
        self.current.lock().await.clone().ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound(
                "no generation group open; save_grid first".to_string(),
            ))
        })
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                temp_path.display(),
                e
            )))
        })?;
        tokio::fs::rename(&temp_path, path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )))
        })
    }

    async fn write_meta(&self, image_path: &Path, meta: &ArtifactMetadata) -> Result<(), StorageError> {
        let meta_path = meta_path_for(image_path);
        let body = serde_json::to_vec_pretty(meta)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;
        self.write_atomic(&meta_path, &body).await
    }

    fn consolidated_path(&self, generation: &Generation) -> PathBuf {
        generation
            .dir
            .join(format!("generation_{}.json", generation.timestamp))
    }
}

fn meta_path_for(image_path: &Path) -> PathBuf {
    let mut name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".meta.json");
    image_path.with_file_name(name)
}

#[async_trait]
impl ArtifactStorage for FileSystemStorage {
    #[tracing::instrument(skip(self, data, meta), fields(size = data.len(), grid = %meta.grid_message_id))]
    async fn save_grid(
        &self,
        data: &[u8],
        meta: &ArtifactMetadata,
    ) -> Result<String, StorageError> {
        let generation = self.begin_generation().await?;

        let grid_path = generation
            .dir
            .join(format!("grid_{}.png", generation.timestamp));
        self.write_atomic(&grid_path, data).await?;
        self.write_meta(&grid_path, meta).await?;

        let prompt_path = generation
            .dir
            .join(format!("prompt_{}.txt", generation.timestamp));
        self.write_atomic(&prompt_path, meta.prompt.as_bytes())
            .await?;

        let consolidated = json!({
            "timestamp": generation.timestamp,
            "prompt": meta.prompt,
            "grid_message_id": meta.grid_message_id,
            "grid_file": grid_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            "upscales": [],
        });
        let body = serde_json::to_vec_pretty(&consolidated)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;
        self.write_atomic(&self.consolidated_path(&generation), &body)
            .await?;

        info!(path = %grid_path.display(), "Saved grid artifact");
        Ok(grid_path.to_string_lossy().to_string())
    }

    #[tracing::instrument(
        skip(self, data, meta),
        fields(size = data.len(), grid = %meta.grid_message_id, variant = meta.variant_index)
    )]
    async fn save_upscale(
        &self,
        data: &[u8],
        meta: &ArtifactMetadata,
    ) -> Result<String, StorageError> {
        let generation = self.current_or_err().await?;
        let variant = meta.variant_index.ok_or_else(|| {
            StorageError::new(StorageErrorKind::Metadata(
                "upscale metadata must carry a variant index".to_string(),
            ))
        })?;

        let upscale_path = generation
            .dir
            .join(format!("variant_{}_{}.png", variant, generation.timestamp));
        self.write_atomic(&upscale_path, data).await?;
        self.write_meta(&upscale_path, meta).await?;

        let entry = UpscaleEntry {
            variant,
            success: true,
            image_file: upscale_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            grid_message_id: meta.grid_message_id,
        };
        self.append_metadata(&generation.timestamp, &entry).await?;

        info!(path = %upscale_path.display(), "Saved upscale artifact");
        Ok(upscale_path.to_string_lossy().to_string())
    }

    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: &UpscaleEntry,
    ) -> Result<(), StorageError> {
        let dir = self.base_path.join(generation_id);
        let path = dir.join(format!("generation_{generation_id}.json"));
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;
        let mut record: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;

        let upscales = record["upscales"].as_array_mut().ok_or_else(|| {
            StorageError::new(StorageErrorKind::Metadata(
                "consolidated record has no upscales array".to_string(),
            ))
        })?;
        let new_entry = serde_json::to_value(entry)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;
        // Upsert by variant index.
        if let Some(existing) = upscales
            .iter_mut()
            .find(|u| u["variant"] == new_entry["variant"])
        {
            *existing = new_entry;
        } else {
            upscales.push(new_entry);
        }

        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;
        self.write_atomic(&path, &body).await?;
        debug!(generation = generation_id, variant = entry.variant, "Updated consolidated record");
        Ok(())
    }

    async fn load(&self, storage_id: &str) -> Result<(Vec<u8>, ArtifactMetadata), StorageError> {
        let path = Path::new(storage_id);
        let data = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::new(StorageErrorKind::NotFound(storage_id.to_string()))
            } else {
                StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        })?;
        let meta_raw = tokio::fs::read(meta_path_for(path)).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                meta_path_for(path).display(),
                e
            )))
        })?;
        let meta: ArtifactMetadata = serde_json::from_slice(&meta_raw)
            .map_err(|e| StorageError::new(StorageErrorKind::Metadata(e.to_string())))?;
        Ok((data, meta))
    }

    async fn current_generation(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|g| g.timestamp.clone())
    }
}
