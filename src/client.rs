//! Client facade.
//!
//! [`MidjourneyClient`] owns every I/O resource: two gateway sessions,
//! the observer, the rate limiter, the interaction transport, the
//! fetcher, and (optionally) artifact storage. Nothing here is process
//! global; dropping the client releases everything.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::{ClientConfig, Tuning};
use crate::error::{
    GatewayError, GatewayErrorKind, GenerationError, GenerationErrorKind, StorageError,
    StorageErrorKind, VermeerResult,
};
use crate::fetcher::ImageFetcher;
use crate::gateway::{GatewayHandle, GatewaySession, SessionConfig};
use crate::generation::{
    correlate_variant, CorrelationRequest, GenerationContext, GenerationDriver, GridInfo,
    ProcessedSet,
};
use crate::model::{upscale_buttons, Artifact, ArtifactKind, GenerationResult, UpscaleResult};
use crate::observer::MessageObserver;
use crate::prompt::{bold_section, fingerprint, GenerationOptions};
use crate::rate_limit::RateLimiter;
use crate::snowflake::Snowflake;
use crate::storage::{ArtifactMetadata, ArtifactStorage, UpscaleEntry};
use crate::transport::{DiscordTransport, InteractionTransport};

/// Live I/O state between `initialize` and `close`.
struct Runtime {
    root: CancellationToken,
    observer: Arc<MessageObserver>,
    sessions: Option<(GatewayHandle, GatewayHandle)>,
    user_session_id: String,
}

/// Drives the provider through the chat platform.
///
/// `generate` is serialized (one in flight per client; each call spends
/// one provider credit). `upscale_all` resolves its four variants in
/// parallel, best effort. `initialize` and `close` are idempotent.
pub struct MidjourneyClient {
    config: ClientConfig,
    tuning: Tuning,
    transport: Arc<dyn InteractionTransport>,
    fetcher: ImageFetcher,
    storage: Option<Arc<dyn ArtifactStorage>>,
    runtime: Mutex<Option<Runtime>>,
    generate_lock: Mutex<()>,
    last_generation: Mutex<Option<(GridInfo, ProcessedSet)>>,
}

impl MidjourneyClient {
    /// Production client over the real HTTPS transport.
    pub fn new(config: ClientConfig, tuning: Tuning) -> Self {
        let limiter = RateLimiter::new(tuning.min_request_interval);
        let transport = Arc::new(DiscordTransport::new(
            config.user_token.clone(),
            config.bot_token.clone(),
            config.guild_id,
            config.channel_id,
            limiter,
            tuning.max_retries,
        ));
        Self {
            config,
            tuning,
            transport,
            fetcher: ImageFetcher::default(),
            storage: None,
            runtime: Mutex::new(None),
            generate_lock: Mutex::new(()),
            last_generation: Mutex::new(None),
        }
    }

    /// Client assembled from parts: a custom transport and an observer
    /// the caller feeds directly. No gateway sessions are opened; used
    /// for deterministic in-process runs.
    pub fn with_parts(
        config: ClientConfig,
        tuning: Tuning,
        transport: Arc<dyn InteractionTransport>,
        observer: Arc<MessageObserver>,
        user_session_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            tuning,
            transport,
            fetcher: ImageFetcher::default(),
            storage: None,
            runtime: Mutex::new(Some(Runtime {
                root: CancellationToken::new(),
                observer,
                sessions: None,
                user_session_id: user_session_id.into(),
            })),
            generate_lock: Mutex::new(()),
            last_generation: Mutex::new(None),
        }
    }

    /// Attach artifact storage for [`save_artifacts`](Self::save_artifacts).
    pub fn with_storage(mut self, storage: Arc<dyn ArtifactStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Open both gateway sessions and wait for READY on each.
    ///
    /// Idempotent: a second call on an initialized client is a no-op.
    ///
    /// # Errors
    ///
    /// A fatal close (bad token, bad intents) surfaces as the session's
    /// [`GatewayError`]; no reconnection is attempted for those.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> VermeerResult<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }

        let root = CancellationToken::new();
        let observer = Arc::new(MessageObserver::new(
            self.tuning.reorder_grace,
            self.tuning.dedupe_capacity,
            &root,
        ));

        let mut user = GatewaySession::spawn(
            SessionConfig {
                token: self.config.user_token.clone(),
                is_bot: false,
                gateway_url: self.tuning.gateway_url.clone(),
            },
            observer.publisher(),
            &root,
        );
        let mut bot = GatewaySession::spawn(
            SessionConfig {
                token: self.config.bot_token.clone(),
                is_bot: true,
                gateway_url: self.tuning.gateway_url.clone(),
            },
            observer.publisher(),
            &root,
        );

        let timeout = self.tuning.ready_timeout;
        let (user_ready, bot_ready) =
            tokio::join!(user.await_ready(timeout), bot.await_ready(timeout));

        let user_session_id = match (user_ready, bot_ready) {
            (Ok(session_id), Ok(_)) => session_id,
            (user_result, bot_result) => {
                user.shutdown().await;
                bot.shutdown().await;
                root.cancel();
                let err = user_result.err().or(bot_result.err()).unwrap_or_else(|| {
                    GatewayError::new(GatewayErrorKind::Closed)
                });
                return Err(err.into());
            }
        };

        info!(session_id = %user_session_id, "Both gateway sessions ready");
        if self.tuning.refresh_commands_on_init {
            self.transport.refresh_commands().await;
        }
        *runtime = Some(Runtime {
            root,
            observer,
            sessions: Some((user, bot)),
            user_session_id,
        });
        Ok(())
    }

    /// Generate a grid for a prompt. One in-flight generation at a time;
    /// each call spends one provider credit regardless of outcome.
    ///
    /// Terminal provider outcomes are reported inside the returned
    /// [`GenerationResult`]; `Err` is reserved for client-level failures
    /// (not initialized).
    pub async fn generate(&self, prompt: &str) -> VermeerResult<GenerationResult> {
        self.generate_with_options(prompt, &GenerationOptions::default())
            .await
    }

    /// [`generate`](Self::generate) with provider flags appended.
    #[instrument(skip(self, options))]
    pub async fn generate_with_options(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> VermeerResult<GenerationResult> {
        let _serial = self.generate_lock.lock().await;
        let (observer, user_session_id) = self.snapshot().await?;

        let full_prompt = options.apply(prompt);
        let mut ctx = GenerationContext::new(full_prompt.clone());
        let driver = GenerationDriver {
            transport: self.transport.clone(),
            channel_id: self.config.channel_id,
            guild_id: self.config.guild_id,
            user_session_id,
            tuning: self.tuning.clone(),
        };

        let outcome = tokio::time::timeout(
            self.tuning.generate_deadline,
            driver.run(&observer, &mut ctx, None),
        )
        .await;

        let result = match outcome {
            Ok(Ok(grid)) => {
                *self.last_generation.lock().await = Some((grid.clone(), ctx.processed.clone()));
                GenerationResult {
                    grid_message_id: Some(grid.message_id),
                    image_url: Some(grid.image_url),
                    prompt: full_prompt,
                    error: None,
                }
            }
            Ok(Err(error)) => GenerationResult {
                grid_message_id: ctx.grid_message_id,
                image_url: None,
                prompt: full_prompt,
                error: Some(error),
            },
            Err(_) => GenerationResult {
                grid_message_id: ctx.grid_message_id,
                image_url: None,
                prompt: full_prompt.clone(),
                error: Some(GenerationError::new(
                    GenerationErrorKind::Deadline("generate".to_string()),
                    fingerprint(&full_prompt),
                )),
            },
        };
        Ok(result)
    }

    /// Upscale all four variants of a grid in parallel.
    ///
    /// Returns exactly four results, one per variant index, completion
    /// order independent. A failed or timed-out variant carries its own
    /// error and never aborts its siblings.
    #[instrument(skip(self), fields(grid = %grid_message_id))]
    pub async fn upscale_all(
        &self,
        grid_message_id: Snowflake,
    ) -> VermeerResult<Vec<UpscaleResult>> {
        let (observer, user_session_id) = self.snapshot().await?;

        let deadline = self.tuning.upscale_all_deadline;
        tokio::time::timeout(
            deadline,
            self.upscale_all_inner(observer, user_session_id, grid_message_id),
        )
        .await
        .map_err(|_| {
            crate::error::VermeerError::from(GenerationError::new(
                GenerationErrorKind::Deadline("upscale_all".to_string()),
                "",
            ))
        })?
    }

    async fn upscale_all_inner(
        &self,
        observer: Arc<MessageObserver>,
        user_session_id: String,
        grid_message_id: Snowflake,
    ) -> VermeerResult<Vec<UpscaleResult>> {
        let (grid, processed) = self.resolve_grid(grid_message_id).await?;

        let message = self.find_message(grid.channel_id, grid_message_id).await?;
        let buttons = upscale_buttons(&message);
        if buttons.len() != 4 {
            return Err(GenerationError::new(
                GenerationErrorKind::InvalidRequest {
                    status: 404,
                    body: format!("message has {} upscale buttons, need 4", buttons.len()),
                },
                &grid.fingerprint,
            )
            .with_message_id(grid_message_id)
            .into());
        }

        let mut tasks = JoinSet::new();
        for button in buttons {
            let request = CorrelationRequest {
                grid: grid.clone(),
                button,
                user_session_id: user_session_id.clone(),
                processed: processed.clone(),
                timeout: self.tuning.upscale_timeout,
                clock_skew: self.tuning.clock_skew,
            };
            let transport = self.transport.clone();
            let observer = observer.clone();
            tasks.spawn(async move {
                correlate_variant(transport, &observer, request).await
            });
        }

        let mut results = Vec::with_capacity(4);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Upscale task aborted"),
            }
        }
        results.sort_by_key(|r| r.variant_index);
        Ok(results)
    }

    /// Find the grid info for an upscale run: the just-finished
    /// generation when the id matches, otherwise rebuilt from the
    /// message itself.
    async fn resolve_grid(
        &self,
        grid_message_id: Snowflake,
    ) -> VermeerResult<(GridInfo, ProcessedSet)> {
        if let Some((grid, processed)) = self.last_generation.lock().await.clone() {
            if grid.message_id == grid_message_id {
                return Ok((grid, processed));
            }
        }

        let message = self
            .find_message(self.config.channel_id, grid_message_id)
            .await?;
        let prompt = bold_section(&message.content).unwrap_or_default().to_string();
        let processed = ProcessedSet::new();
        processed.claim(grid_message_id);
        Ok((
            GridInfo {
                message_id: grid_message_id,
                channel_id: message.channel_id,
                fingerprint: fingerprint(&prompt),
                prompt,
                image_url: message
                    .first_attachment_url()
                    .unwrap_or_default()
                    .to_string(),
            },
            processed,
        ))
    }

    /// Fetch a message by id, falling back to a recent-history scan when
    /// the direct lookup fails.
    async fn find_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> VermeerResult<crate::model::Message> {
        match self.transport.get_message(channel_id, message_id).await {
            Ok(message) => Ok(message),
            Err(lookup_err) => {
                warn!(message_id = %message_id, error = %lookup_err, "Direct lookup failed, scanning history");
                let recent = self
                    .transport
                    .list_recent_messages(channel_id, 50)
                    .await
                    .map_err(crate::error::VermeerError::from)?;
                recent
                    .into_iter()
                    .find(|m| m.id == message_id)
                    .ok_or_else(|| lookup_err.into())
            }
        }
    }

    /// Download and persist a generation's artifacts.
    ///
    /// Saves the grid first (opening the generation group), then each
    /// successful upscale; failed variants are recorded in the
    /// consolidated metadata with `success: false`. Returns the storage
    /// ids of the saved images.
    #[instrument(skip(self, generation, upscales))]
    pub async fn save_artifacts(
        &self,
        generation: &GenerationResult,
        upscales: &[UpscaleResult],
    ) -> VermeerResult<Vec<String>> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            StorageError::new(StorageErrorKind::NotFound(
                "no storage configured".to_string(),
            ))
        })?;
        let grid_message_id = generation.grid_message_id.ok_or_else(|| {
            StorageError::new(StorageErrorKind::Metadata(
                "generation has no grid to save".to_string(),
            ))
        })?;
        let grid_url = generation.image_url.as_deref().ok_or_else(|| {
            StorageError::new(StorageErrorKind::Metadata(
                "generation has no image url".to_string(),
            ))
        })?;

        let mut saved = Vec::new();

        let (bytes, mime) = self.fetcher.fetch(grid_url).await?;
        let grid_artifact = Artifact {
            bytes,
            kind: ArtifactKind::Grid,
            variant_index: None,
            grid_message_id,
            prompt: generation.prompt.clone(),
            timestamp: Utc::now(),
            source_url: grid_url.to_string(),
            mime,
        };
        let mut grid_meta = ArtifactMetadata::from(&grid_artifact);
        grid_meta.message_id = Some(grid_message_id);
        saved.push(storage.save_grid(&grid_artifact.bytes, &grid_meta).await?);
        let generation_id = storage.current_generation().await.unwrap_or_default();

        for upscale in upscales {
            if let (None, Some(url)) = (&upscale.error, &upscale.image_url) {
                let (bytes, mime) = self.fetcher.fetch(url).await?;
                let artifact = Artifact {
                    bytes,
                    kind: ArtifactKind::Upscale,
                    variant_index: Some(upscale.variant_index),
                    grid_message_id: upscale.grid_message_id,
                    prompt: generation.prompt.clone(),
                    timestamp: Utc::now(),
                    source_url: url.clone(),
                    mime,
                };
                let mut meta = ArtifactMetadata::from(&artifact);
                meta.message_id = upscale.message_id;
                saved.push(storage.save_upscale(&artifact.bytes, &meta).await?);
            } else {
                let entry = UpscaleEntry {
                    variant: upscale.variant_index,
                    success: false,
                    image_file: String::new(),
                    grid_message_id: upscale.grid_message_id,
                };
                storage.append_metadata(&generation_id, &entry).await?;
            }
        }

        info!(count = saved.len(), at = %Utc::now(), "Artifacts persisted");
        Ok(saved)
    }

    /// Cancel all tasks and release sessions. Idempotent.
    ///
    /// Teardown order: the session tasks first (their heartbeat tickers
    /// and socket readers stop together), then the root token, which
    /// stops the observer dispatcher and resolves outstanding
    /// subscriptions with cancellation.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let mut runtime = self.runtime.lock().await;
        if let Some(rt) = runtime.take() {
            if let Some((user, bot)) = rt.sessions {
                user.shutdown().await;
                bot.shutdown().await;
            }
            rt.root.cancel();
            info!("Client closed");
        }
    }

    /// Observer and user session id, or an error when not initialized.
    async fn snapshot(&self) -> VermeerResult<(Arc<MessageObserver>, String)> {
        let runtime = self.runtime.lock().await;
        match runtime.as_ref() {
            Some(rt) => Ok((rt.observer.clone(), rt.user_session_id.clone())),
            None => Err(GatewayError::new(GatewayErrorKind::Closed).into()),
        }
    }
}
