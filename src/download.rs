//! Fetches generated media into memory.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{AuthHeader, MediaPayload};
use crate::error::{classify_status, ProviderError, Result};
use crate::retry::{is_transient_network_error, RetryPolicy};

/// Default timeout for one download attempt (120 seconds).
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Redirects followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest URI prefix that appears in errors and logs.
const MAX_LOGGED_URI_CHARS: usize = 120;

/// Strip the query string and fragment from a URI and cap its length, so
/// signed URLs never reach logs or error messages.
pub fn redact_uri(uri: &str) -> String {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    let base = &uri[..end];
    if base.chars().count() <= MAX_LOGGED_URI_CHARS {
        base.to_string()
    } else {
        let cut: String = base.chars().take(MAX_LOGGED_URI_CHARS).collect();
        format!("{}...", cut)
    }
}

/// Resolves a [`MediaPayload`] to bytes.
#[derive(Clone)]
pub struct Downloader {
    http_client: reqwest::Client,
    policy: RetryPolicy,
}

impl Downloader {
    /// Create a downloader with the default retry policy and timeout.
    pub fn new() -> Result<Self> {
        Self::with_settings(RetryPolicy::default(), DEFAULT_DOWNLOAD_TIMEOUT)
    }

    /// Create a downloader with an explicit retry policy and per-attempt timeout.
    pub fn with_settings(policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::permanent(None, format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            http_client,
            policy,
        })
    }

    /// Resolve the payload to bytes.
    ///
    /// Inline data is returned as-is, streams are drained fully, and URIs are
    /// fetched with retries.
    pub async fn fetch(&self, payload: MediaPayload, cancel: &CancellationToken) -> Result<Vec<u8>> {
        match payload {
            MediaPayload::Inline { data, .. } => Ok(data),
            MediaPayload::Stream { mut stream, .. } => {
                let mut buffer = Vec::new();
                loop {
                    let chunk = tokio::select! {
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                        chunk = stream.next() => chunk,
                    };
                    match chunk {
                        Some(chunk) => buffer.extend_from_slice(&chunk?),
                        None => break,
                    }
                }
                if buffer.is_empty() {
                    return Err(ProviderError::transient(None, "media stream was empty"));
                }
                log::debug!("Read {} bytes from media stream", buffer.len());
                Ok(buffer)
            }
            MediaPayload::Uri { uri, .. } if uri.starts_with("data:") => {
                match MediaPayload::from_data_url(&uri)? {
                    MediaPayload::Inline { data, .. } => Ok(data),
                    _ => Err(ProviderError::permanent(None, "unexpected data URL payload")),
                }
            }
            MediaPayload::Uri { uri, auth, .. } => self.fetch_uri(&uri, auth.as_ref(), cancel).await,
        }
    }

    async fn fetch_uri(
        &self,
        uri: &str,
        auth: Option<&AuthHeader>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let redacted = redact_uri(uri);
        let label = format!("Download of {}", redacted);

        let bytes = self
            .policy
            .run(&label, cancel, ProviderError::is_retryable, |_| {
                let redacted = redacted.as_str();
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                        result = self.fetch_once(uri, auth, redacted) => result,
                    }
                }
            })
            .await?;

        log::info!("Downloaded {} bytes from {}", bytes.len(), redacted);
        Ok(bytes)
    }

    /// One GET, following redirects by hand. The auth header is only sent
    /// while the request stays on the origin of the original URI.
    async fn fetch_once(
        &self,
        uri: &str,
        auth: Option<&AuthHeader>,
        redacted: &str,
    ) -> Result<Vec<u8>> {
        let origin_url = reqwest::Url::parse(uri).map_err(|e| {
            ProviderError::permanent(None, format!("invalid download URI {}: {}", redacted, e))
        })?;
        let mut current = origin_url.clone();
        let mut redirects = 0usize;

        let response = loop {
            let mut request = self.http_client.get(current.clone());
            if let Some(auth) = auth {
                if same_origin(&origin_url, &current) {
                    request = request.header(auth.name.as_str(), auth.value.as_str());
                }
            }

            let response = request.send().await.map_err(|e| transport_error(e, redacted))?;
            if !response.status().is_redirection() {
                break response;
            }

            let code = response.status().as_u16();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    ProviderError::permanent(
                        Some(code),
                        format!("download of {} redirected without a location", redacted),
                    )
                })?;
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(ProviderError::permanent(
                    Some(code),
                    format!("download of {} exceeded {} redirects", redacted, MAX_REDIRECTS),
                ));
            }
            current = current.join(location).map_err(|e| {
                ProviderError::permanent(
                    Some(code),
                    format!("download of {} redirected to an invalid location: {}", redacted, e),
                )
            })?;
            log::debug!(
                "Download of {} redirected to {}",
                redacted,
                redact_uri(current.as_str())
            );
        };

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            return Err(match classify_status(code, "") {
                ProviderError::Transient { .. } => ProviderError::transient(
                    Some(code),
                    format!("download of {} returned HTTP {}", redacted, code),
                ),
                _ => ProviderError::permanent(
                    Some(code),
                    format!("download of {} rejected with HTTP {}", redacted, code),
                ),
            });
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| transport_error(e, redacted))?;
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(ProviderError::transient(
                Some(status.as_u16()),
                format!("download of {} returned an empty body", redacted),
            ));
        }

        Ok(body)
    }
}

fn same_origin(a: &reqwest::Url, b: &reqwest::Url) -> bool {
    a.origin() == b.origin()
}

/// Classify a reqwest failure without leaking the full URL.
fn transport_error(error: reqwest::Error, redacted: &str) -> ProviderError {
    let status = error.status().map(|s| s.as_u16());
    let transient = is_transient_network_error(&error);
    let message = format!("download of {} failed: {}", redacted, error.without_url());
    if transient {
        ProviderError::transient(status, message)
    } else {
        ProviderError::permanent(status, message)
    }
}
