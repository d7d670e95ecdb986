//! Drives one backend from submission to a downloaded clip.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backend::{
    is_content_policy_error, MediaBackend, MediaPayload, Operation, OperationState,
    ProviderOutput,
};
use crate::download::Downloader;
use crate::error::{ProviderError, Result};
use crate::retry::RetryPolicy;
use crate::types::{sniff_mime, validate_prompt, ClipRequest, GeneratedClip, RequestWarning};

/// Default polling interval for status checks (10 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default overall budget for one operation (8 minutes).
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_secs(8 * 60);

/// Used when neither the provider nor the bytes say what the media is.
const FALLBACK_MIME_TYPE: &str = "video/mp4";

/// Timing knobs for [`ClipGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub poll_interval: Duration,
    pub max_poll_duration: Duration,
    /// Applied to submission, which is retried only on rate limiting.
    pub submit_retry: RetryPolicy,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_duration: DEFAULT_MAX_POLL_DURATION,
            submit_retry: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
        }
    }
}

/// A rejected submission is safe to resend only when the provider never
/// accepted it.
fn is_rate_limited(error: &ProviderError) -> bool {
    matches!(
        error,
        ProviderError::Transient {
            status: Some(429),
            ..
        }
    )
}

/// Produces one clip from one backend.
#[derive(Clone)]
pub struct ClipGenerator {
    backend: Arc<dyn MediaBackend>,
    downloader: Downloader,
    settings: GeneratorSettings,
}

impl ClipGenerator {
    pub fn new(backend: Arc<dyn MediaBackend>, downloader: Downloader) -> Self {
        Self {
            backend,
            downloader,
            settings: GeneratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: GeneratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate a request and adapt it to the backend's capabilities.
    ///
    /// Returns the request that will actually be submitted, plus a warning for
    /// every value that was clamped or input that was dropped.
    pub fn prepare(&self, mut request: ClipRequest) -> Result<(ClipRequest, Vec<RequestWarning>)> {
        validate_prompt(&request.prompt)?;

        let caps = self.backend.capabilities();
        let backend = self.backend.name().to_string();
        let mut warnings = Vec::new();

        let effective = caps.clamp_duration(request.duration_seconds);
        if effective != request.duration_seconds {
            warnings.push(RequestWarning::DurationClamped {
                requested: request.duration_seconds,
                effective,
            });
            request.duration_seconds = effective;
        }

        if request.grounding_source.is_some() && !caps.supports_grounding {
            request.grounding_source = None;
            warnings.push(RequestWarning::GroundingDropped {
                backend: backend.clone(),
            });
        }

        if request.reference_image.is_some()
            && (!caps.supports_reference_image || request.grounding_source.is_some())
        {
            request.reference_image = None;
            warnings.push(RequestWarning::ReferenceImageDropped { backend });
        }

        for warning in &warnings {
            log::warn!("{}", warning);
        }

        Ok((request, warnings))
    }

    /// Generate one clip: submit, poll to completion, normalize, download.
    pub async fn generate(
        &self,
        request: ClipRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedClip> {
        let (request, warnings) = self.prepare(request)?;
        let duration_seconds = request.duration_seconds;

        let operation = self
            .settings
            .submit_retry
            .run(
                &format!("{} submission", self.backend.name()),
                cancel,
                is_rate_limited,
                |_| self.backend.submit(&request, cancel),
            )
            .await?;

        log::info!(
            "{} accepted operation {}",
            self.backend.name(),
            operation.handle
        );

        let operation = self.wait_for_completion(operation, cancel).await?;
        let output = finished_output(operation)?;
        let payload = normalize(output)?;
        let declared_mime = payload.mime_type().map(str::to_string);

        let bytes = self.downloader.fetch(payload, cancel).await?;
        let mime_type = declared_mime
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| {
                log::debug!("Unknown media type, assuming {}", FALLBACK_MIME_TYPE);
                FALLBACK_MIME_TYPE.to_string()
            });

        Ok(GeneratedClip::new(bytes, mime_type, duration_seconds).with_warnings(warnings))
    }

    /// Poll until the operation finishes or the time budget is spent.
    async fn wait_for_completion(
        &self,
        mut operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<Operation> {
        let started = Instant::now();
        let mut polls = 0u32;

        while !operation.is_finished() {
            let elapsed = started.elapsed();
            if elapsed >= self.settings.max_poll_duration {
                log::error!(
                    "Operation {} still running after {:?}. Giving up.",
                    operation.handle,
                    elapsed
                );
                return Err(ProviderError::Timeout { elapsed });
            }

            let wait = self
                .settings
                .poll_interval
                .min(self.settings.max_poll_duration - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            polls += 1;
            let handle = operation.handle.clone();
            let created_at = operation.created_at;
            log::debug!("Polling {} (poll #{}, {:?} elapsed)", handle, polls, started.elapsed());

            operation = match self.backend.poll(operation, cancel).await {
                Ok(op) => op,
                Err(e) if e.is_retryable() => {
                    log::warn!("Poll of {} failed, will retry: {}", handle, e);
                    let mut op = Operation::pending(handle);
                    op.created_at = created_at;
                    op
                }
                Err(e) => return Err(e),
            };
        }

        Ok(operation)
    }
}

/// Extract the output of a finished operation, classifying provider errors.
fn finished_output(operation: Operation) -> Result<ProviderOutput> {
    if operation.state == OperationState::Failed {
        let error = operation.error.unwrap_or_else(|| crate::backend::OperationError {
            code: None,
            message: "operation failed without details".to_string(),
        });
        if is_content_policy_error(&error.message) {
            return Err(ProviderError::Filtered {
                reasons: vec![error.message],
            });
        }
        let detail = match error.code {
            Some(code) => format!("operation failed (code {}): {}", code, error.message),
            None => format!("operation failed: {}", error.message),
        };
        return Err(ProviderError::permanent(None, detail));
    }

    log::info!("Operation {} finished", operation.handle);
    Ok(operation.output.unwrap_or_default())
}

/// Reduce a finished job's raw output to the single payload to download.
///
/// Zero playable outputs with a filter signal is `Filtered`; zero outputs
/// without one is `Permanent`.
pub fn normalize(output: ProviderOutput) -> Result<MediaPayload> {
    let filtered = output.is_filtered();
    let ProviderOutput {
        payloads,
        filtered_count,
        filtered_reasons,
    } = output;

    match payloads.into_iter().next() {
        Some(payload) => {
            if filtered {
                log::warn!(
                    "Provider filtered {} output(s); using the remaining one",
                    filtered_count
                );
            }
            Ok(payload)
        }
        None if filtered => Err(ProviderError::Filtered {
            reasons: filtered_reasons,
        }),
        None => Err(ProviderError::permanent(None, "no video")),
    }
}
