//! fal.ai synchronous run endpoint.
//!
//! `POST {base}/{vendor}/{model}` blocks until the video is ready, so
//! `submit` returns a finished [`Operation`] and `poll` hands it back untouched.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    api_key_from_env, cancellable, classify_response, BackendCapabilities, MediaBackend,
    MediaPayload, Operation, ProviderOutput,
};
use crate::error::{ProviderError, Result};
use crate::types::ClipRequest;

/// Environment variables checked, in order, for the fal.ai API key.
pub const FAL_API_KEY_ENVS: &[&str] = &["FAL_KEY", "FAL_API_KEY"];

/// Default base URL for the fal.ai synchronous API.
pub const FAL_API_BASE_URL: &str = "https://fal.run";

/// Default model for video generation.
pub const FAL_DEFAULT_MODEL: &str = "fal-ai/ltx-video";

/// Synchronous runs hold the connection open for the whole generation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Default connection timeout (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_ID_HEADER: &str = "x-fal-request-id";

/// fal.ai reports safety rejections as 400, 403 or 422.
const POLICY_STATUSES: &[u16] = &[400, 403, 422];

/// Backend for fal.ai hosted models.
pub struct FalRunBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
    capabilities: BackendCapabilities,
}

impl FalRunBackend {
    /// Create a backend by reading the API key from `FAL_KEY` or `FAL_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key(api_key_from_env(FAL_API_KEY_ENVS)?)
    }

    /// Create a backend with an explicit API key.
    pub fn with_api_key(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, FAL_API_BASE_URL.to_string())
    }

    /// Create a backend with a custom base URL.
    ///
    /// Useful for testing against a mock server.
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey {
                env: FAL_API_KEY_ENVS.join(" or "),
            });
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::permanent(None, format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            capabilities: BackendCapabilities {
                min_duration_seconds: 5,
                max_duration_seconds: 10,
                supports_grounding: false,
                supports_reference_image: true,
                default_model: FAL_DEFAULT_MODEL.to_string(),
            },
        })
    }

    fn run_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model.trim_matches('/'))
    }
}

/// Turn a run response into provider output.
fn collect_output(response: RunResponse) -> Result<ProviderOutput> {
    let nsfw_count = response
        .has_nsfw_concepts
        .unwrap_or_default()
        .into_iter()
        .filter(|flagged| *flagged)
        .count() as u32;

    let mut payloads = Vec::new();
    if let Some(video) = response.video {
        if video.url.starts_with("data:") {
            let payload = match MediaPayload::from_data_url(&video.url)? {
                MediaPayload::Inline { data, mime_type } => MediaPayload::Inline {
                    data,
                    mime_type: mime_type.or(video.content_type),
                },
                other => other,
            };
            payloads.push(payload);
        } else if !video.url.is_empty() {
            payloads.push(MediaPayload::Uri {
                uri: video.url,
                auth: None,
                mime_type: video.content_type,
            });
        }
    }

    let filtered_reasons = if nsfw_count > 0 {
        vec!["nsfw content detected".to_string()]
    } else {
        Vec::new()
    };

    Ok(ProviderOutput {
        payloads,
        filtered_count: nsfw_count,
        filtered_reasons,
    })
}

#[async_trait]
impl MediaBackend for FalRunBackend {
    fn name(&self) -> &str {
        "fal"
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    async fn submit(&self, request: &ClipRequest, cancel: &CancellationToken) -> Result<Operation> {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.capabilities.default_model);
        let url = self.run_url(model);
        let body = RunRequest::from_request(request);

        log::info!(
            "Running fal.ai model {} ({}s, {})",
            model,
            request.duration_seconds,
            request.aspect_ratio
        );

        cancellable(cancel, async {
            let response = self
                .http_client
                .post(&url)
                .header("Authorization", format!("Key {}", self.api_key))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(classify_response(status.as_u16(), &error_text, POLICY_STATUSES));
            }

            let handle = response
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| model.to_string());

            let run: RunResponse = response.json().await?;
            let output = collect_output(run)?;
            log::info!("fal.ai run {} finished", handle);
            Ok(Operation::completed(handle, output))
        })
        .await
    }

    async fn poll(&self, operation: Operation, _cancel: &CancellationToken) -> Result<Operation> {
        Ok(operation)
    }
}

// ── Wire format ─────────────────────────────────────────────────────────────

/// Request body for a run.
#[derive(Debug, Serialize)]
struct RunRequest {
    prompt: String,
    /// Seconds, as a string ("5", "10").
    duration: String,
    aspect_ratio: String,
    /// Reference image as a `data:` URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
}

impl RunRequest {
    fn from_request(request: &ClipRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            duration: request.duration_seconds.to_string(),
            aspect_ratio: request.aspect_ratio.as_str().to_string(),
            image_url: request.reference_image.as_ref().map(|img| img.to_data_url()),
            negative_prompt: request.negative_prompt.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    video: Option<VideoOutput>,
    #[serde(default)]
    has_nsfw_concepts: Option<Vec<bool>>,
}

/// Video output from a successful run.
#[derive(Debug, Deserialize)]
struct VideoOutput {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content_type: Option<String>,
}
