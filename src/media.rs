//! Local media tooling: joining clips, probing durations, grabbing frames.
//!
//! [`FfmpegTool`] shells out to `ffmpeg`/`ffprobe` with explicit argument
//! lists. Every call works in its own scratch directory, removed on drop.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{truncate, ProviderError, Result};
use crate::types::{GeneratedClip, MediaInput};

/// Default timeout for joining clips (60 seconds).
pub const DEFAULT_CONCAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for probes and frame extraction (30 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of joining clips.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatOutput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Measured duration of the joined file, when the probe succeeded.
    pub duration_seconds: Option<f64>,
}

/// Container-level operations on generated clips.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Join clips in order without re-encoding. A single clip is returned
    /// unchanged.
    async fn concat(
        &self,
        clips: &[GeneratedClip],
        cancel: &CancellationToken,
    ) -> Result<ConcatOutput>;

    /// Measured duration of a clip in seconds.
    async fn probe_duration(&self, clip: &GeneratedClip, cancel: &CancellationToken)
        -> Result<f64>;

    /// The final frame of a clip as a PNG image.
    async fn extract_last_frame(
        &self,
        clip: &GeneratedClip,
        cancel: &CancellationToken,
    ) -> Result<MediaInput>;
}

/// ffprobe JSON output, `-show_format` only.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse the container duration out of ffprobe's JSON.
fn parse_probe_duration(json: &[u8]) -> Result<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| ProviderError::tool("ffprobe", format!("unreadable output: {}", e)))?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ProviderError::tool("ffprobe", "no duration reported"))
}

/// One line of an ffmpeg concat list, quoted for the demuxer.
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', "'\\''");
    format!("file '{}'\n", escaped)
}

/// `ffmpeg`/`ffprobe` adapter.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    concat_timeout: Duration,
    probe_timeout: Duration,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTool {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            concat_timeout: DEFAULT_CONCAT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, concat: Duration, probe: Duration) -> Self {
        self.concat_timeout = concat;
        self.probe_timeout = probe;
        self
    }

    fn scratch_dir() -> Result<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix("clipchain-")
            .tempdir()
            .map_err(|e| ProviderError::tool("scratch", format!("cannot create temp dir: {}", e)))
    }

    async fn write_clip(dir: &Path, name: &str, clip: &GeneratedClip) -> Result<PathBuf> {
        let path = dir.join(format!("{}.{}", name, clip.file_extension()));
        tokio::fs::write(&path, clip.bytes())
            .await
            .map_err(|e| ProviderError::tool("scratch", format!("cannot write clip: {}", e)))?;
        Ok(path)
    }

    /// Run a tool to completion, returning stdout.
    async fn run(
        &self,
        program: &Path,
        args: Vec<OsString>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string_lossy().into_owned());

        log::debug!("Running {} {:?}", tool, args);

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::tool(&tool, format!("cannot start: {}", e)))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|e| ProviderError::tool(&tool, e.to_string()))?,
                Err(_) => {
                    log::warn!("{} timed out after {:?}, killing process", tool, timeout);
                    return Err(ProviderError::tool(&tool, format!("timed out after {:?}", timeout)));
                }
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.trim().chars().collect();
                let start = chars.len().saturating_sub(500);
                chars[start..].iter().collect()
            };
            return Err(ProviderError::tool(
                &tool,
                format!("{}: {}", output.status, truncate(&tail, 500)),
            ));
        }

        Ok(output.stdout)
    }

    async fn probe_path(&self, path: &Path, cancel: &CancellationToken) -> Result<f64> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            path.as_os_str().to_owned(),
        ];
        let stdout = self
            .run(&self.ffprobe, args, self.probe_timeout, cancel)
            .await?;
        parse_probe_duration(&stdout)
    }

    /// Probe, logging instead of failing.
    async fn try_probe(&self, path: &Path, cancel: &CancellationToken) -> Option<f64> {
        match self.probe_path(path, cancel).await {
            Ok(duration) => Some(duration),
            Err(e) => {
                log::warn!("Could not probe {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn concat(
        &self,
        clips: &[GeneratedClip],
        cancel: &CancellationToken,
    ) -> Result<ConcatOutput> {
        let first = clips
            .first()
            .ok_or_else(|| ProviderError::InvalidRequest("nothing to concatenate".to_string()))?;

        let dir = Self::scratch_dir()?;

        if clips.len() == 1 {
            let path = Self::write_clip(dir.path(), "clip_000", first).await?;
            return Ok(ConcatOutput {
                bytes: first.bytes().to_vec(),
                mime_type: first.mime_type().to_string(),
                duration_seconds: self.try_probe(&path, cancel).await,
            });
        }

        let mut list = String::new();
        for (i, clip) in clips.iter().enumerate() {
            let path = Self::write_clip(dir.path(), &format!("clip_{:03}", i), clip).await?;
            list.push_str(&concat_list_entry(&path));
        }
        let list_path = dir.path().join("list.txt");
        tokio::fs::write(&list_path, list)
            .await
            .map_err(|e| ProviderError::tool("scratch", format!("cannot write list: {}", e)))?;

        let output_path = dir
            .path()
            .join(format!("merged.{}", first.file_extension()));
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
            output_path.as_os_str().to_owned(),
        ];
        self.run(&self.ffmpeg, args, self.concat_timeout, cancel)
            .await?;

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| ProviderError::tool("ffmpeg", format!("no output file: {}", e)))?;
        if bytes.is_empty() {
            return Err(ProviderError::tool("ffmpeg", "produced an empty file"));
        }

        log::info!("Joined {} clips ({} bytes)", clips.len(), bytes.len());

        Ok(ConcatOutput {
            bytes,
            mime_type: first.mime_type().to_string(),
            duration_seconds: self.try_probe(&output_path, cancel).await,
        })
    }

    async fn probe_duration(
        &self,
        clip: &GeneratedClip,
        cancel: &CancellationToken,
    ) -> Result<f64> {
        let dir = Self::scratch_dir()?;
        let path = Self::write_clip(dir.path(), "probe", clip).await?;
        self.probe_path(&path, cancel).await
    }

    async fn extract_last_frame(
        &self,
        clip: &GeneratedClip,
        cancel: &CancellationToken,
    ) -> Result<MediaInput> {
        let dir = Self::scratch_dir()?;
        let input = Self::write_clip(dir.path(), "source", clip).await?;
        let frame = dir.path().join("last_frame.png");

        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-sseof".into(),
            "-1".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-frames:v".into(),
            "1".into(),
            "-update".into(),
            "1".into(),
            frame.as_os_str().to_owned(),
        ];
        self.run(&self.ffmpeg, args, self.probe_timeout, cancel)
            .await?;

        let bytes = tokio::fs::read(&frame)
            .await
            .map_err(|e| ProviderError::tool("ffmpeg", format!("no frame extracted: {}", e)))?;
        if bytes.is_empty() {
            return Err(ProviderError::tool("ffmpeg", "extracted an empty frame"));
        }
        Ok(MediaInput::new(bytes, "image/png"))
    }
}
