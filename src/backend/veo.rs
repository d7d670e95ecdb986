//! Veo (Google) video generation through the Gemini long-running operation API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    api_key_from_env, cancellable, classify_response, AuthHeader, BackendCapabilities,
    MediaBackend, MediaPayload, Operation, OperationError, OperationState, ProviderOutput,
};
use crate::error::{ProviderError, Result};
use crate::types::{ClipRequest, MediaInput};

/// Environment variables checked, in order, for the API key.
pub const VEO_API_KEY_ENVS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Default base URL for the Gemini Developer API.
pub const VEO_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model for video generation.
pub const VEO_DEFAULT_MODEL: &str = "veo-3.1-generate-preview";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Statuses whose bodies may describe a safety rejection. Google reports
/// PERMISSION_DENIED as 403 with "blocked" wording, so 403 is excluded.
const POLICY_STATUSES: &[u16] = &[400, 422];

/// Timeout for individual submit/poll requests. Media travels inline in the
/// submit body, so this is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Short names accepted by the router, mapped to API model ids.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("veo-3.1", "veo-3.1-generate-preview"),
    ("veo-3.1-fast", "veo-3.1-fast-generate-preview"),
    ("veo-3", "veo-3.0-generate-001"),
    ("veo-3-fast", "veo-3.0-fast-generate-001"),
    ("veo-2", "veo-2.0-generate-001"),
];

/// Resolve a short model name to its API id. Unknown names pass through.
pub(crate) fn resolve_model(model: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == model)
        .map(|(_, id)| *id)
        .unwrap_or(model)
}

/// Polling backend for Veo.
pub struct VeoBackend {
    api_key: String,
    base_url: String,
    http_client: reqwest::Client,
    capabilities: BackendCapabilities,
}

impl VeoBackend {
    /// Create a backend by reading the API key from `GEMINI_API_KEY` or
    /// `GOOGLE_API_KEY`.
    pub fn new() -> Result<Self> {
        Self::with_api_key(api_key_from_env(VEO_API_KEY_ENVS)?)
    }

    /// Create a backend with an explicit API key.
    pub fn with_api_key(api_key: String) -> Result<Self> {
        Self::with_base_url(api_key, VEO_API_BASE_URL.to_string())
    }

    /// Create a backend against a custom base URL (useful for mock servers).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey {
                env: VEO_API_KEY_ENVS.join(" or "),
            });
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::permanent(None, format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            capabilities: BackendCapabilities {
                min_duration_seconds: 4,
                max_duration_seconds: 8,
                supports_grounding: true,
                supports_reference_image: true,
                default_model: VEO_DEFAULT_MODEL.to_string(),
            },
        })
    }

    fn submit_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:predictLongRunning",
            self.base_url,
            resolve_model(model)
        )
    }

    fn operation_url(&self, handle: &str) -> String {
        format!("{}/{}", self.base_url, handle.trim_start_matches('/'))
    }

    /// Convert an operation document into the shared state machine.
    fn interpret(&self, handle: &str, response: VeoOperationResponse) -> Result<Operation> {
        let handle = if response.name.is_empty() {
            handle.to_string()
        } else {
            response.name
        };

        if let Some(err) = response.error {
            let message = err
                .message
                .unwrap_or_else(|| "Unknown error occurred during generation".to_string());
            log::warn!("Veo operation {} failed: {}", handle, message);
            let mut operation = Operation::pending(handle);
            operation.state = OperationState::Failed;
            operation.error = Some(OperationError {
                code: err.code,
                message,
            });
            return Ok(operation);
        }

        if !response.done.unwrap_or(false) {
            return Ok(Operation::pending(handle));
        }

        let output = response
            .response
            .and_then(|r| r.generate_video_response)
            .map(|r| self.collect_output(r))
            .transpose()?
            .unwrap_or_default();

        Ok(Operation::completed(handle, output))
    }

    fn collect_output(&self, response: VeoGenerateVideoResponse) -> Result<ProviderOutput> {
        let mut payloads = Vec::new();

        for video in response
            .generated_samples
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| s.video)
        {
            if let Some(b64) = video.bytes_base64_encoded {
                use base64::Engine;
                let data = base64::engine::general_purpose::STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| {
                        ProviderError::permanent(None, format!("invalid inline video data: {}", e))
                    })?;
                payloads.push(MediaPayload::Inline {
                    data,
                    mime_type: video.mime_type,
                });
            } else if let Some(uri) = video.uri {
                let uri = match uri.strip_prefix("gs://") {
                    Some(path) => format!("https://storage.googleapis.com/{}", path),
                    None => uri,
                };
                payloads.push(MediaPayload::Uri {
                    uri,
                    auth: Some(AuthHeader::new(API_KEY_HEADER, self.api_key.clone())),
                    mime_type: video.mime_type,
                });
            }
        }

        Ok(ProviderOutput {
            payloads,
            filtered_count: response.rai_media_filtered_count.unwrap_or(0),
            filtered_reasons: response.rai_media_filtered_reasons.unwrap_or_default(),
        })
    }

    async fn read_operation(&self, handle: &str, response: reqwest::Response) -> Result<Operation> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_response(status.as_u16(), &error_text, POLICY_STATUSES));
        }

        let body: VeoOperationResponse = response.json().await?;
        self.interpret(handle, body)
    }
}

#[async_trait]
impl MediaBackend for VeoBackend {
    fn name(&self) -> &str {
        "veo"
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    async fn submit(&self, request: &ClipRequest, cancel: &CancellationToken) -> Result<Operation> {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.capabilities.default_model);
        let url = self.submit_url(model);
        let body = VeoRequest::from_request(request);

        log::info!(
            "Submitting Veo request (model: {}, {}s, {})",
            resolve_model(model),
            request.duration_seconds,
            request.aspect_ratio
        );

        let operation = cancellable(cancel, async {
            let response = self
                .http_client
                .post(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .json(&body)
                .send()
                .await?;
            self.read_operation("", response).await
        })
        .await?;

        if operation.handle.is_empty() && !operation.is_finished() {
            return Err(ProviderError::permanent(None, "operation without name"));
        }
        Ok(operation)
    }

    async fn poll(&self, operation: Operation, cancel: &CancellationToken) -> Result<Operation> {
        let url = self.operation_url(&operation.handle);
        let created_at = operation.created_at;

        let mut refreshed = cancellable(cancel, async {
            let response = self
                .http_client
                .get(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .send()
                .await?;
            self.read_operation(&operation.handle, response).await
        })
        .await?;

        refreshed.created_at = created_at;
        Ok(refreshed)
    }
}

// ── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoRequest {
    instances: Vec<VeoInstance>,
    parameters: VeoParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInlineData {
    mime_type: String,
    data: String,
}

/// Media payload wrapping `inlineData`, used for images and videos.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoMediaData {
    inline_data: VeoInlineData,
}

impl VeoMediaData {
    fn from_input(input: &MediaInput) -> Self {
        use base64::Engine;
        Self {
            inline_data: VeoInlineData {
                mime_type: input.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&input.bytes),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoInstance {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VeoMediaData>,
    /// Video to extend.
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<VeoMediaData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VeoParameters {
    aspect_ratio: String,
    duration_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolution: Option<String>,
    number_of_videos: u32,
}

impl VeoRequest {
    fn from_request(request: &ClipRequest) -> Self {
        let video = request.grounding_source.as_ref().map(VeoMediaData::from_input);
        // Extension only accepts the video; the generator drops the image first.
        let image = if video.is_none() {
            request.reference_image.as_ref().map(VeoMediaData::from_input)
        } else {
            None
        };
        // Video extension requires 720p.
        let resolution = video.as_ref().map(|_| "720p".to_string());

        Self {
            instances: vec![VeoInstance {
                prompt: request.prompt.clone(),
                image,
                video,
            }],
            parameters: VeoParameters {
                aspect_ratio: request.aspect_ratio.as_str().to_string(),
                duration_seconds: request.duration_seconds,
                negative_prompt: request.negative_prompt.clone(),
                resolution,
                number_of_videos: 1,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct VeoOperationResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    response: Option<VeoVideoResponse>,
    #[serde(default)]
    error: Option<VeoError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoVideoResponse {
    #[serde(default)]
    generate_video_response: Option<VeoGenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoGenerateVideoResponse {
    #[serde(default)]
    generated_samples: Option<Vec<VeoGeneratedSample>>,
    #[serde(default)]
    rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    rai_media_filtered_reasons: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VeoGeneratedSample {
    #[serde(default)]
    video: Option<VeoVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VeoVideo {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VeoError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}
