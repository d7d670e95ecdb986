//! The entry point callers use: one clip, one chained video, or a batch.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::backend::{FalRunBackend, MediaBackend, VeoBackend, FAL_API_KEY_ENVS, VEO_API_KEY_ENVS};
use crate::chain::{ChainAssembler, ChainOptions};
use crate::config::Config;
use crate::download::Downloader;
use crate::error::{ProviderError, Result};
use crate::generator::{ClipGenerator, GeneratorSettings};
use crate::media::MediaTool;
use crate::router::{ProviderRouter, Route};
use crate::types::{ChainResult, ClipRequest, GeneratedClip};

/// Wires routing, generation, chaining and joining together.
#[derive(Clone)]
pub struct ClipStudio {
    router: ProviderRouter,
    downloader: Downloader,
    tool: Arc<dyn MediaTool>,
    settings: GeneratorSettings,
    batch_concurrency: usize,
}

impl ClipStudio {
    pub fn new(router: ProviderRouter, downloader: Downloader, tool: Arc<dyn MediaTool>) -> Self {
        Self {
            router,
            downloader,
            tool,
            settings: GeneratorSettings::default(),
            batch_concurrency: 1,
        }
    }

    /// Build everything from configuration, reading API keys from the
    /// environment. A backend whose key is missing is left out; routing to it
    /// then fails with a routing error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut router = ProviderRouter::new(config.models.video.clone())
            .with_primary_prefixes(config.models.primary_prefixes.clone());

        match crate::backend::api_key_from_env(VEO_API_KEY_ENVS) {
            Ok(key) => {
                let veo = VeoBackend::with_base_url(key, config.providers.veo_base_url.clone())?;
                router = router.with_primary(Arc::new(veo));
            }
            Err(e) => log::debug!("Veo backend disabled: {}", e),
        }

        match crate::backend::api_key_from_env(FAL_API_KEY_ENVS) {
            Ok(key) => {
                let fal = FalRunBackend::with_base_url(key, config.providers.fal_base_url.clone())?;
                router = router.with_secondary(Arc::new(fal));
            }
            Err(e) => log::debug!("fal.ai backend disabled: {}", e),
        }

        let downloader =
            Downloader::with_settings(config.download_policy(), config.download_timeout())?;

        Ok(Self::new(router, downloader, Arc::new(config.ffmpeg_tool()))
            .with_generator_settings(config.generator_settings())
            .with_batch_concurrency(config.batch.concurrency))
    }

    pub fn with_generator_settings(mut self, settings: GeneratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Number of batch items in flight at once. Zero is treated as one.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    fn generator_for(&self, backend: Arc<dyn MediaBackend>) -> ClipGenerator {
        ClipGenerator::new(backend, self.downloader.clone()).with_settings(self.settings.clone())
    }

    fn resolve(&self, model: Option<&str>) -> Result<Route> {
        self.router.route_or_default(model)
    }

    /// Generate a single clip.
    pub async fn generate_clip(
        &self,
        mut request: ClipRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedClip> {
        let route = self.resolve(request.model.as_deref())?;
        request.model = Some(route.model.clone());
        self.generator_for(route.backend).generate(request, cancel).await
    }

    /// Generate one clip per prompt, each grounded on the last, and join them.
    ///
    /// Returns `Err` only for routing or validation problems; a failed step
    /// is reported inside the result with everything generated before it.
    pub async fn generate_video(
        &self,
        prompts: &[String],
        mut options: ChainOptions,
        cancel: &CancellationToken,
    ) -> Result<ChainResult> {
        options.validate(prompts.len())?;
        let route = self.resolve(options.model.as_deref())?;
        options.model = Some(route.model.clone());

        log::info!(
            "Generating {} chained clips with {} ({}s, {}s overlap)",
            prompts.len(),
            route.model,
            options.clip_seconds,
            options.overlap_seconds
        );

        ChainAssembler::new(self.generator_for(route.backend), Arc::clone(&self.tool))
            .assemble(prompts, &options, cancel)
            .await
    }

    /// Generate independent clips. Results keep the input order and one
    /// failure never affects the others.
    pub async fn generate_clips_batch(
        &self,
        requests: Vec<ClipRequest>,
        cancel: &CancellationToken,
    ) -> Vec<std::result::Result<GeneratedClip, ProviderError>> {
        let total = requests.len();
        log::info!(
            "Generating batch of {} clips ({} at a time)",
            total,
            self.batch_concurrency
        );

        let results: Vec<_> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| async move {
                let result = self.generate_clip(request, cancel).await;
                if let Err(e) = &result {
                    log::warn!("Batch item {}/{} failed: {}", index + 1, total, e);
                }
                result
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        results
    }
}
