//! In-memory storage backend.
//!
//! The second concrete storage variant: used under tests and wherever
//! durable output is not wanted. Shares the full contract, including the
//! consolidated per-generation record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StorageError, StorageErrorKind};

use super::{ArtifactMetadata, ArtifactStorage, UpscaleEntry};

#[derive(Default)]
struct Store {
    artifacts: HashMap<String, (Vec<u8>, ArtifactMetadata)>,
    generations: HashMap<String, Vec<UpscaleEntry>>,
    current: Option<String>,
}

/// Memory-backed storage.
#[derive(Default)]
pub struct MemoryStorage {
    store: Mutex<Store>,
    counter: AtomicU64,
}

impl MemoryStorage {
    /// Fresh empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub async fn artifact_count(&self) -> usize {
        self.store.lock().await.artifacts.len()
    }

    /// Consolidated upscale entries for a generation.
    pub async fn generation_entries(&self, generation_id: &str) -> Vec<UpscaleEntry> {
        self.store
            .lock()
            .await
            .generations
            .get(generation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStorage for MemoryStorage {
    async fn save_grid(
        &self,
        data: &[u8],
        meta: &ArtifactMetadata,
    ) -> Result<String, StorageError> {
        let generation_id = format!("gen_{}", self.counter.fetch_add(1, Ordering::Relaxed));
        let storage_id = format!("mem:{generation_id}:grid");
        let mut store = self.store.lock().await;
        store
            .artifacts
            .insert(storage_id.clone(), (data.to_vec(), meta.clone()));
        store.generations.insert(generation_id.clone(), Vec::new());
        store.current = Some(generation_id);
        debug!(id = %storage_id, "Stored grid in memory");
        Ok(storage_id)
    }

    async fn save_upscale(
        &self,
        data: &[u8],
        meta: &ArtifactMetadata,
    ) -> Result<String, StorageError> {
        let variant = meta.variant_index.ok_or_else(|| {
            StorageError::new(StorageErrorKind::Metadata(
                "upscale metadata must carry a variant index".to_string(),
            ))
        })?;
        let mut store = self.store.lock().await;
        let generation_id = store.current.clone().ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound(
                "no generation group open; save_grid first".to_string(),
            ))
        })?;
        let storage_id = format!("mem:{generation_id}:variant_{variant}");
        store
            .artifacts
            .insert(storage_id.clone(), (data.to_vec(), meta.clone()));

        let entry = UpscaleEntry {
            variant,
            success: true,
            image_file: storage_id.clone(),
            grid_message_id: meta.grid_message_id,
        };
        let entries = store.generations.entry(generation_id).or_default();
        match entries.iter_mut().find(|e| e.variant == variant) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(storage_id)
    }

    async fn append_metadata(
        &self,
        generation_id: &str,
        entry: &UpscaleEntry,
    ) -> Result<(), StorageError> {
        let mut store = self.store.lock().await;
        let entries = store
            .generations
            .get_mut(generation_id)
            .ok_or_else(|| {
                StorageError::new(StorageErrorKind::NotFound(generation_id.to_string()))
            })?;
        match entries.iter_mut().find(|e| e.variant == entry.variant) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn load(&self, storage_id: &str) -> Result<(Vec<u8>, ArtifactMetadata), StorageError> {
        self.store
            .lock()
            .await
            .artifacts
            .get(storage_id)
            .cloned()
            .ok_or_else(|| StorageError::new(StorageErrorKind::NotFound(storage_id.to_string())))
    }

    async fn current_generation(&self) -> Option<String> {
        self.store.lock().await.current.clone()
    }
}
