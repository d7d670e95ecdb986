//! Error taxonomy shared by every component.
//!
//! Errors are classified once, at the boundary where a provider response (or a
//! tool exit status) is interpreted, and then propagated unchanged.

use std::time::Duration;

/// Errors that can occur while generating or assembling clips.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the prompt or its output on content-safety grounds.
    /// Never retried.
    #[error("content filtered: {}", display_reasons(.reasons))]
    Filtered {
        /// Reasons reported by the provider, verbatim.
        reasons: Vec<String>,
    },

    /// Network failure, 5xx, or a status that often resolves on its own
    /// (403/404/408/429).
    #[error("transient failure{}: {message}", display_status(.status))]
    Transient {
        /// Last observed HTTP status, if a response was received at all.
        status: Option<u16>,
        /// Human-readable description.
        message: String,
    },

    /// Malformed request or any other 4xx. Never retried.
    #[error("request rejected{}: {detail}", display_status(.status))]
    Permanent {
        /// HTTP status, when the rejection came from an HTTP response.
        status: Option<u16>,
        /// Provider detail message.
        detail: String,
    },

    /// The operation exceeded its polling budget. It may still be running
    /// server-side.
    #[error("operation timed out after {elapsed:?}")]
    Timeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// A local subprocess (ffmpeg, ffprobe) failed.
    #[error("{tool} failed: {message}")]
    ToolFailure {
        /// Name of the tool that failed.
        tool: String,
        /// Exit status and stderr excerpt.
        message: String,
    },

    /// No backend matches the model identifier.
    #[error("routing failed: {0}")]
    Routing(String),

    /// The request was rejected before reaching any backend.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider's API key is not configured.
    #[error("API key not configured (set {env})")]
    MissingApiKey {
        /// Environment variable that should hold the key.
        env: String,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Returns true only for failures worth retrying locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
            _ => None,
        }
    }

    /// Guidance to show an end user alongside the error.
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Filtered { .. } => Some(
                "The provider's safety filter rejected this prompt. Rephrase it rather than retrying.",
            ),
            Self::Timeout { .. } => Some(
                "The job may still be running server-side. Retrying will start a new, billed job.",
            ),
            Self::Transient { .. } => Some("This is usually temporary. Try again shortly."),
            Self::MissingApiKey { .. } => {
                Some("Add the key to a .env file or export it in your shell.")
            }
            _ => None,
        }
    }

    pub(crate) fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn permanent(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            detail: detail.into(),
        }
    }

    pub(crate) fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        let status = error.status().map(|s| s.as_u16());
        if error.is_decode() {
            return Self::permanent(status, format!("malformed provider response: {}", error));
        }
        match status {
            Some(code) if !is_transient_status(code) && (400..500).contains(&code) => {
                Self::permanent(Some(code), error.to_string())
            }
            _ => Self::transient(status, error.to_string()),
        }
    }
}

/// Statuses that often indicate the remote object is not materialized yet,
/// or that the provider is temporarily overloaded.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 403 | 404 | 408 | 429) || (500..600).contains(&status)
}

/// Classify a non-success HTTP status and its body.
pub(crate) fn classify_status(status: u16, body: &str) -> ProviderError {
    if is_transient_status(status) {
        ProviderError::transient(Some(status), truncate(body, 300))
    } else {
        ProviderError::permanent(Some(status), truncate(body, 300))
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn display_reasons(reasons: &[String]) -> String {
    if reasons.is_empty() {
        "no reason given".to_string()
    } else {
        reasons.join(", ")
    }
}

fn display_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
