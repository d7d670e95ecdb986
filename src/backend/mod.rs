//! Remote media-generation backends.
//!
//! A backend submits one request to one provider and reports raw,
//! provider-shaped output through the [`Operation`] state machine. Polling
//! backends return `Polling` operations from `submit`; synchronous backends
//! return `Done` ones, and their `poll` is the identity.

mod fal;
mod veo;

use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};
use crate::types::ClipRequest;

pub use fal::{FalRunBackend, FAL_API_BASE_URL, FAL_API_KEY_ENVS, FAL_DEFAULT_MODEL};
pub use veo::{VeoBackend, VEO_API_BASE_URL, VEO_API_KEY_ENVS, VEO_DEFAULT_MODEL};

/// A chunked byte stream produced by a backend that can stream directly.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// What a backend can accept.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCapabilities {
    pub min_duration_seconds: u32,
    pub max_duration_seconds: u32,
    /// Accepts a previous clip as visual context.
    pub supports_grounding: bool,
    /// Accepts a still image as first frame / reference.
    pub supports_reference_image: bool,
    /// Model used when the request does not name one.
    pub default_model: String,
}

impl BackendCapabilities {
    /// Clamp a requested duration into the supported closed interval.
    pub fn clamp_duration(&self, requested: u32) -> u32 {
        requested.clamp(self.min_duration_seconds, self.max_duration_seconds)
    }
}

/// Trait for remote generation backends.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Short name for logs, e.g. `"veo"`.
    fn name(&self) -> &str;

    fn capabilities(&self) -> &BackendCapabilities;

    /// Submit one request. The request has already been validated and
    /// clamped by the caller.
    async fn submit(&self, request: &ClipRequest, cancel: &CancellationToken) -> Result<Operation>;

    /// Refresh an operation. Must be safe to call repeatedly, including on a
    /// finished operation.
    async fn poll(&self, operation: Operation, cancel: &CancellationToken) -> Result<Operation>;
}

/// Lifecycle of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Submitted,
    Polling,
    Done,
    Failed,
}

/// Error reported inside a finished operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    pub code: Option<i64>,
    pub message: String,
}

/// One in-flight remote job.
#[derive(Debug)]
pub struct Operation {
    /// Opaque provider-issued handle (operation name, request id).
    pub handle: String,
    pub state: OperationState,
    pub created_at: SystemTime,
    pub error: Option<OperationError>,
    /// Raw output, present once `state` is `Done`.
    pub output: Option<ProviderOutput>,
}

impl Operation {
    /// A freshly accepted job that still has to be polled.
    pub fn pending(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            state: OperationState::Polling,
            created_at: SystemTime::now(),
            error: None,
            output: None,
        }
    }

    /// A job that finished during submission.
    pub fn completed(handle: impl Into<String>, output: ProviderOutput) -> Self {
        Self {
            handle: handle.into(),
            state: OperationState::Done,
            created_at: SystemTime::now(),
            error: None,
            output: Some(output),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, OperationState::Done | OperationState::Failed)
    }
}

/// Raw output of a finished job, before normalization.
#[derive(Debug, Default)]
pub struct ProviderOutput {
    pub payloads: Vec<MediaPayload>,
    /// Number of outputs the provider's safety filter removed.
    pub filtered_count: u32,
    pub filtered_reasons: Vec<String>,
}

impl ProviderOutput {
    pub fn is_filtered(&self) -> bool {
        self.filtered_count > 0 || !self.filtered_reasons.is_empty()
    }
}

/// Credential attached to a download as a header, never in the URI.
#[derive(Clone, PartialEq)]
pub struct AuthHeader {
    pub name: String,
    pub value: String,
}

impl AuthHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHeader")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Where a finished job's video lives.
pub enum MediaPayload {
    /// Bytes already in the response.
    Inline {
        data: Vec<u8>,
        mime_type: Option<String>,
    },
    /// A byte stream that must be consumed fully.
    Stream {
        stream: ByteStream,
        mime_type: Option<String>,
    },
    /// A remote object that needs a second fetch.
    Uri {
        uri: String,
        auth: Option<AuthHeader>,
        mime_type: Option<String>,
    },
}

impl MediaPayload {
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Inline { mime_type, .. }
            | Self::Stream { mime_type, .. }
            | Self::Uri { mime_type, .. } => mime_type.as_deref(),
        }
    }

    /// Decode a `data:<mime>;base64,<data>` URL into an inline payload.
    pub fn from_data_url(url: &str) -> Result<Self> {
        use base64::Engine;

        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| ProviderError::permanent(None, "not a data URL"))?;
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| ProviderError::permanent(None, "data URL without payload"))?;
        let mime = meta.strip_suffix(";base64").ok_or_else(|| {
            ProviderError::permanent(None, "only base64 data URLs are supported")
        })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ProviderError::permanent(None, format!("invalid base64 video: {}", e)))?;

        Ok(Self::Inline {
            data: bytes,
            mime_type: (!mime.is_empty()).then(|| mime.to_string()),
        })
    }
}

impl std::fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline { data, mime_type } => f
                .debug_struct("Inline")
                .field("data", &format_args!("{} bytes", data.len()))
                .field("mime_type", mime_type)
                .finish(),
            Self::Stream { mime_type, .. } => f
                .debug_struct("Stream")
                .field("mime_type", mime_type)
                .finish_non_exhaustive(),
            Self::Uri {
                uri, mime_type, ..
            } => f
                .debug_struct("Uri")
                .field("uri", &crate::download::redact_uri(uri))
                .field("mime_type", mime_type)
                .finish_non_exhaustive(),
        }
    }
}

/// Keywords that indicate a content policy rejection in an error body.
const CONTENT_POLICY_KEYWORDS: &[&str] = &[
    "content policy",
    "policy violation",
    "safety",
    "inappropriate",
    "prohibited",
    "blocked",
    "unsafe",
    "violates",
    "moderation",
    "nsfw",
];

/// Check if an error body indicates a content policy violation.
pub(crate) fn is_content_policy_error(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    CONTENT_POLICY_KEYWORDS
        .iter()
        .any(|keyword| lower.contains(keyword))
}

/// Interpret a non-success response body from a provider.
///
/// Keyword matching only applies to `policy_statuses`; each provider reports
/// safety rejections on its own set of statuses.
pub(crate) fn classify_response(
    status: u16,
    body: &str,
    policy_statuses: &[u16],
) -> ProviderError {
    if policy_statuses.contains(&status) && is_content_policy_error(body) {
        log::warn!("Prompt rejected by content policy: {}", crate::error::truncate(body, 200));
        return ProviderError::Filtered {
            reasons: vec![crate::error::truncate(body, 200)],
        };
    }
    crate::error::classify_status(status, body)
}

/// Race a provider call against cancellation.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = future => result,
    }
}

/// Read an API key from the first set environment variable.
pub(crate) fn api_key_from_env(vars: &[&str]) -> Result<String> {
    vars.iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| ProviderError::MissingApiKey {
            env: vars.join(" or "),
        })
}
