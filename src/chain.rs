//! Sequential clip chaining.
//!
//! Each clip after the first is grounded on its predecessor and asked for
//! `L - O` seconds, so `N` clips of length `L` overlapping by `O` seconds
//! cover `L + (N - 1)(L - O)` seconds once joined.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};
use crate::generator::ClipGenerator;
use crate::media::MediaTool;
use crate::types::{
    AspectRatio, ChainResult, ClipRequest, DurationSource, GeneratedClip, DEFAULT_CLIP_SECONDS,
};

/// Default overlap between consecutive clips, in seconds.
pub const DEFAULT_OVERLAP_SECONDS: u32 = 2;

/// Probe/formula disagreement worth a warning, in seconds.
const DRIFT_WARN_SECONDS: f64 = 1.0;

/// How a clip is conditioned on its predecessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroundingMode {
    /// Send the previous clip itself (video extension).
    #[default]
    Clip,
    /// Send the previous clip's last frame as the reference image.
    LastFrame,
}

/// Parameters for one chained generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOptions {
    /// Length of the first clip (`L`).
    pub clip_seconds: u32,
    /// Seconds each later clip overlaps its predecessor (`O`).
    pub overlap_seconds: u32,
    pub aspect_ratio: AspectRatio,
    pub model: Option<String>,
    pub grounding: GroundingMode,
    pub negative_prompt: Option<String>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            clip_seconds: DEFAULT_CLIP_SECONDS,
            overlap_seconds: DEFAULT_OVERLAP_SECONDS,
            aspect_ratio: AspectRatio::default(),
            model: None,
            grounding: GroundingMode::default(),
            negative_prompt: None,
        }
    }
}

impl ChainOptions {
    pub fn validate(&self, prompt_count: usize) -> Result<()> {
        if prompt_count == 0 {
            return Err(ProviderError::InvalidRequest(
                "at least one prompt is required".to_string(),
            ));
        }
        if self.overlap_seconds >= self.clip_seconds {
            return Err(ProviderError::InvalidRequest(format!(
                "overlap ({}s) must be shorter than the clip length ({}s)",
                self.overlap_seconds, self.clip_seconds
            )));
        }
        Ok(())
    }

    /// Requested length of step `index`.
    pub fn step_seconds(&self, index: usize) -> u32 {
        if index == 0 {
            self.clip_seconds
        } else {
            self.clip_seconds - self.overlap_seconds
        }
    }
}

/// Unique duration of `clips` chained clips: `L + (N - 1)(L - O)`.
pub fn expected_duration(clips: usize, clip_seconds: u32, overlap_seconds: u32) -> u32 {
    if clips == 0 {
        return 0;
    }
    let step = clip_seconds.saturating_sub(overlap_seconds);
    clip_seconds.saturating_add(step.saturating_mul(clips as u32 - 1))
}

/// Builds one continuous video out of several prompts.
pub struct ChainAssembler {
    generator: ClipGenerator,
    tool: Arc<dyn MediaTool>,
}

impl ChainAssembler {
    pub fn new(generator: ClipGenerator, tool: Arc<dyn MediaTool>) -> Self {
        Self { generator, tool }
    }

    /// Generate one clip per prompt, in order, then join the successful prefix.
    ///
    /// Only invalid options are an `Err`; a step failure stops the chain and
    /// is reported in [`ChainResult::failure`].
    pub async fn assemble(
        &self,
        prompts: &[String],
        options: &ChainOptions,
        cancel: &CancellationToken,
    ) -> Result<ChainResult> {
        options.validate(prompts.len())?;

        let total_steps = prompts.len();
        let mut clips: Vec<GeneratedClip> = Vec::with_capacity(total_steps);
        let mut running_total = 0u32;
        let mut failure = None;

        for (index, prompt) in prompts.iter().enumerate() {
            log::info!("Chain step {}/{}", index + 1, total_steps);

            let request = match self
                .build_request(index, prompt, options, clips.last(), cancel)
                .await
            {
                Ok(request) => request,
                Err(e) => {
                    log::error!("Chain step {} could not be prepared: {}", index + 1, e);
                    failure = Some(e);
                    break;
                }
            };

            match self.generator.generate(request, cancel).await {
                Ok(clip) => {
                    running_total += clip.duration_seconds();
                    clips.push(clip);
                }
                Err(e) => {
                    log::error!("Chain step {}/{} failed: {}", index + 1, total_steps, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let estimated =
            expected_duration(clips.len(), options.clip_seconds, options.overlap_seconds);
        let (merged_clip, total_duration_seconds, duration_source) =
            self.merge(&clips, running_total, cancel).await;

        let mut per_clip: Vec<Option<GeneratedClip>> = clips.into_iter().map(Some).collect();
        per_clip.resize(total_steps, None);

        Ok(ChainResult {
            merged_clip,
            per_clip,
            total_duration_seconds,
            estimated_duration_seconds: estimated,
            duration_source,
            failure,
        })
    }

    async fn build_request(
        &self,
        index: usize,
        prompt: &str,
        options: &ChainOptions,
        previous: Option<&GeneratedClip>,
        cancel: &CancellationToken,
    ) -> Result<ClipRequest> {
        let mut request = ClipRequest::new(prompt)
            .with_duration(options.step_seconds(index))
            .with_aspect_ratio(options.aspect_ratio);
        if let Some(model) = &options.model {
            request = request.with_model(model.clone());
        }
        if let Some(negative) = &options.negative_prompt {
            request = request.with_negative_prompt(negative.clone());
        }

        if let Some(previous) = previous {
            request = match options.grounding {
                GroundingMode::Clip => request.with_grounding(previous.to_media_input()),
                GroundingMode::LastFrame => {
                    let frame = self.tool.extract_last_frame(previous, cancel).await?;
                    request.with_reference_image(frame)
                }
            };
        }

        Ok(request)
    }

    /// Join the successful clips and decide the reported duration.
    async fn merge(
        &self,
        clips: &[GeneratedClip],
        running_total: u32,
        cancel: &CancellationToken,
    ) -> (Option<GeneratedClip>, u32, DurationSource) {
        let last = match clips.last() {
            Some(last) => last,
            None => return (None, 0, DurationSource::Estimated),
        };

        if cancel.is_cancelled() {
            return (Some(last.clone()), running_total, DurationSource::Estimated);
        }

        match self.tool.concat(clips, cancel).await {
            Ok(output) => {
                let merged = GeneratedClip::new(output.bytes, output.mime_type, running_total);
                let measured = match output.duration_seconds {
                    Some(seconds) => Some(seconds),
                    None => match self.tool.probe_duration(&merged, cancel).await {
                        Ok(seconds) => Some(seconds),
                        Err(e) => {
                            log::warn!("Could not measure the merged video: {}", e);
                            None
                        }
                    },
                };
                let (total, source) = match measured {
                    Some(measured) => {
                        if (measured - running_total as f64).abs() > DRIFT_WARN_SECONDS {
                            log::warn!(
                                "Merged video is {:.1}s, expected {}s from the overlap formula",
                                measured,
                                running_total
                            );
                        }
                        (measured.round() as u32, DurationSource::Probed)
                    }
                    None => (running_total, DurationSource::Formula),
                };
                (Some(merged.with_duration_seconds(total)), total, source)
            }
            Err(e) => {
                log::warn!(
                    "Could not join {} clips, returning the last one instead: {}",
                    clips.len(),
                    e
                );
                let summed: u32 = clips.iter().map(GeneratedClip::duration_seconds).sum();
                (Some(last.clone()), summed, DurationSource::Estimated)
            }
        }
    }
}
