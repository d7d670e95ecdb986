//! Configuration file handling for clipchain.
//!
//! Loads configuration from `<config dir>/clipchain/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::{FAL_API_BASE_URL, VEO_API_BASE_URL};
use crate::chain::{ChainOptions, DEFAULT_OVERLAP_SECONDS};
use crate::generator::GeneratorSettings;
use crate::media::FfmpegTool;
use crate::retry::RetryPolicy;
use crate::types::DEFAULT_CLIP_SECONDS;

/// Configuration file structure for clipchain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Video model used when a request names none.
    #[serde(default = "default_video_model")]
    pub video: String,
    /// Bare model-name prefixes served by the polling backend.
    #[serde(default = "default_primary_prefixes")]
    pub primary_prefixes: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            video: default_video_model(),
            primary_prefixes: default_primary_prefixes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_poll_secs")]
    pub max_duration_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_duration_secs: default_max_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_clip_seconds")]
    pub clip_seconds: u32,
    #[serde(default = "default_overlap_seconds")]
    pub overlap_seconds: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            clip_seconds: default_clip_seconds(),
            overlap_seconds: default_overlap_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_concat_timeout_secs")]
    pub concat_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            concat_timeout_secs: default_concat_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_veo_base_url")]
    pub veo_base_url: String,
    #[serde(default = "default_fal_base_url")]
    pub fal_base_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            veo_base_url: default_veo_base_url(),
            fal_base_url: default_fal_base_url(),
        }
    }
}

fn default_video_model() -> String {
    "veo-3.1".to_string()
}

fn default_primary_prefixes() -> Vec<String> {
    crate::router::DEFAULT_PRIMARY_PREFIXES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_max_poll_secs() -> u64 {
    8 * 60
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_secs() -> u64 {
    crate::retry::DEFAULT_BACKOFF_BASE.as_secs()
}

fn default_max_delay_secs() -> u64 {
    crate::retry::DEFAULT_BACKOFF_MAX.as_secs()
}

fn default_download_timeout_secs() -> u64 {
    crate::download::DEFAULT_DOWNLOAD_TIMEOUT.as_secs()
}

fn default_clip_seconds() -> u32 {
    DEFAULT_CLIP_SECONDS
}

fn default_overlap_seconds() -> u32 {
    DEFAULT_OVERLAP_SECONDS
}

fn default_concurrency() -> usize {
    1
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_concat_timeout_secs() -> u64 {
    crate::media::DEFAULT_CONCAT_TIMEOUT.as_secs()
}

fn default_probe_timeout_secs() -> u64 {
    crate::media::DEFAULT_PROBE_TIMEOUT.as_secs()
}

fn default_veo_base_url() -> String {
    VEO_API_BASE_URL.to_string()
}

fn default_fal_base_url() -> String {
    FAL_API_BASE_URL.to_string()
}

impl Config {
    /// Load configuration.
    ///
    /// With no explicit path, a missing default file yields the defaults. An
    /// explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_path() {
                Some(p) => (p, false),
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigError::NotFound { path });
            }
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { source, .. } => ConfigError::ParseError { path, source },
            other => other,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "polling.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.chain.overlap_seconds >= self.chain.clip_seconds {
            return Err(ConfigError::Invalid(format!(
                "chain.overlap_seconds ({}) must be less than chain.clip_seconds ({})",
                self.chain.overlap_seconds, self.chain.clip_seconds
            )));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn generator_settings(&self) -> GeneratorSettings {
        GeneratorSettings {
            poll_interval: Duration::from_secs(self.polling.interval_secs),
            max_poll_duration: Duration::from_secs(self.polling.max_duration_secs),
            ..GeneratorSettings::default()
        }
    }

    pub fn download_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.download.max_attempts,
            base_delay: Duration::from_secs(self.download.base_delay_secs),
            max_delay: Duration::from_secs(self.download.max_delay_secs),
            jitter: true,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download.timeout_secs)
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            clip_seconds: self.chain.clip_seconds,
            overlap_seconds: self.chain.overlap_seconds,
            ..ChainOptions::default()
        }
    }

    pub fn ffmpeg_tool(&self) -> FfmpegTool {
        FfmpegTool::new(&self.tools.ffmpeg, &self.tools.ffprobe).with_timeouts(
            Duration::from_secs(self.tools.concat_timeout_secs),
            Duration::from_secs(self.tools.probe_timeout_secs),
        )
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    NotFound {
        path: PathBuf,
    },
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    SerializeError(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound { path } => {
                write!(f, "Config file '{}' does not exist", path.display())
            }
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::SerializeError(source) => {
                write!(f, "Failed to render config: {}", source)
            }
            ConfigError::Invalid(message) => write!(f, "Invalid config: {}", message),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::SerializeError(source) => Some(source),
            ConfigError::NotFound { .. } | ConfigError::Invalid(_) => None,
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("clipchain").join("config.toml"))
}
