//! Core request and result types.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ProviderError, Result};

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    /// 16:9 landscape.
    #[default]
    #[serde(rename = "16:9")]
    Landscape16x9,
    /// 9:16 portrait.
    #[serde(rename = "9:16")]
    Portrait9x16,
    /// 1:1 square.
    #[serde(rename = "1:1")]
    Square1x1,
}

impl AspectRatio {
    /// Wire representation, e.g. `"16:9"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape16x9 => "16:9",
            Self::Portrait9x16 => "9:16",
            Self::Square1x1 => "1:1",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "16:9" => Ok(Self::Landscape16x9),
            "9:16" => Ok(Self::Portrait9x16),
            "1:1" => Ok(Self::Square1x1),
            other => Err(ProviderError::InvalidRequest(format!(
                "unsupported aspect ratio '{}' (expected 16:9, 9:16 or 1:1)",
                other
            ))),
        }
    }
}

/// Binary media handed to a backend as context.
#[derive(Clone, PartialEq)]
pub struct MediaInput {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `video/mp4` or `image/png`.
    pub mime_type: String,
}

impl MediaInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Read a file, sniffing its MIME type from magic bytes.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let mime_type = sniff_mime(&bytes).unwrap_or("application/octet-stream");
        Ok(Self::new(bytes, mime_type))
    }

    /// Encode as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        use base64::Engine;
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

impl std::fmt::Debug for MediaInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaInput")
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// A request to generate a single clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    /// The text prompt describing the desired clip. Must not be empty.
    pub prompt: String,
    /// Model identifier; `None` means the router's default.
    pub model: Option<String>,
    /// Requested length, clamped to the backend's supported range.
    pub duration_seconds: u32,
    /// Output aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// A previously generated clip used as visual context.
    pub grounding_source: Option<MediaInput>,
    /// A still image used as the first frame / style reference.
    pub reference_image: Option<MediaInput>,
    /// Things the model should avoid.
    pub negative_prompt: Option<String>,
}

/// Clip length used when the caller does not ask for one.
pub const DEFAULT_CLIP_SECONDS: u32 = 8;

impl ClipRequest {
    /// Creates a new request with the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            duration_seconds: DEFAULT_CLIP_SECONDS,
            aspect_ratio: AspectRatio::default(),
            grounding_source: None,
            reference_image: None,
            negative_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_seconds = secs;
        self
    }

    pub fn with_aspect_ratio(mut self, ratio: AspectRatio) -> Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Ground the new clip on a previous one.
    pub fn with_grounding(mut self, source: MediaInput) -> Self {
        self.grounding_source = Some(source);
        self
    }

    pub fn with_reference_image(mut self, image: MediaInput) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_negative_prompt(mut self, negative: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative.into());
        self
    }
}

/// Validate a prompt before sending it anywhere.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(ProviderError::InvalidRequest("prompt is empty".to_string()));
    }
    Ok(())
}

/// Something [`crate::generator::ClipGenerator::prepare`] changed or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestWarning {
    /// Requested duration was outside the backend's range.
    DurationClamped {
        requested: u32,
        effective: u32,
    },
    /// The backend cannot use a grounding clip; it was dropped.
    GroundingDropped { backend: String },
    /// The backend cannot use a reference image, or grounding took precedence.
    ReferenceImageDropped { backend: String },
}

impl std::fmt::Display for RequestWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DurationClamped {
                requested,
                effective,
            } => write!(
                f,
                "duration {}s out of range, clamped to {}s",
                requested, effective
            ),
            Self::GroundingDropped { backend } => {
                write!(f, "{} does not support grounding clips; dropped", backend)
            }
            Self::ReferenceImageDropped { backend } => {
                write!(f, "{} cannot use the reference image here; dropped", backend)
            }
        }
    }
}

/// A generated clip. Immutable once produced.
#[derive(Clone, PartialEq)]
pub struct GeneratedClip {
    bytes: Vec<u8>,
    mime_type: String,
    duration_seconds: u32,
    warnings: Vec<RequestWarning>,
}

impl GeneratedClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            duration_seconds,
            warnings: Vec::new(),
        }
    }

    /// Attach the adjustments made to the request that produced this clip.
    pub(crate) fn with_warnings(mut self, warnings: Vec<RequestWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub(crate) fn with_duration_seconds(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    /// Inputs that were clamped or dropped before submission.
    pub fn warnings(&self) -> &[RequestWarning] {
        &self.warnings
    }

    /// File extension matching the clip's container.
    pub fn file_extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// Returns the size of the clip in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Use this clip as grounding context for the next request.
    pub fn to_media_input(&self) -> MediaInput {
        MediaInput::new(self.bytes.clone(), self.mime_type.clone())
    }

    /// Saves the clip to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

impl std::fmt::Debug for GeneratedClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedClip")
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("duration_seconds", &self.duration_seconds)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

/// File extension for a video MIME type; anything unrecognised is saved as mp4.
pub(crate) fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        _ => "mp4",
    }
}

/// Where [`ChainResult::total_duration_seconds`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationSource {
    /// Measured on the merged file.
    Probed,
    /// Overlap formula; the merge succeeded but could not be probed.
    Formula,
    /// Sum of individual clip durations after the merge failed.
    Estimated,
}

/// Outcome of a chained generation.
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// Merged video of the successful prefix, or the last successful clip if
    /// merging failed. `None` when not even the first clip succeeded.
    pub merged_clip: Option<GeneratedClip>,
    /// One entry per prompt: a strict prefix of `Some` followed by `None`.
    pub per_clip: Vec<Option<GeneratedClip>>,
    /// Best known unique duration of `merged_clip`.
    pub total_duration_seconds: u32,
    /// Pre-flight formula value for the successful prefix.
    pub estimated_duration_seconds: u32,
    pub duration_source: DurationSource,
    /// The error that stopped the chain, if any.
    pub failure: Option<ProviderError>,
}

impl ChainResult {
    /// Number of clips that were generated.
    pub fn succeeded(&self) -> usize {
        self.per_clip.iter().take_while(|c| c.is_some()).count()
    }

    /// True when every requested clip was generated.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.per_clip.iter().all(Option::is_some)
    }
}

/// Detect a media MIME type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        if &bytes[8..10] == b"qt" {
            return Some("video/quicktime");
        }
        return Some("video/mp4");
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("video/webm");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}
