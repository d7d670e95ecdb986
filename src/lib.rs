//! clipchain: generate video clips with remote models and chain them into
//! longer videos.
//!
//! [`ClipStudio`] is the entry point. It routes a model identifier to a
//! [`MediaBackend`], drives the job through [`ClipGenerator`], and for
//! multi-prompt videos chains clips with [`ChainAssembler`] before joining
//! them with a [`MediaTool`].

pub mod backend;
pub mod chain;
pub mod config;
pub mod download;
pub mod error;
pub mod generator;
pub mod media;
pub mod retry;
pub mod router;
pub mod studio;
pub mod types;

pub use backend::{
    AuthHeader, BackendCapabilities, ByteStream, FalRunBackend, MediaBackend, MediaPayload,
    Operation, OperationError, OperationState, ProviderOutput, VeoBackend,
};
pub use chain::{expected_duration, ChainAssembler, ChainOptions, GroundingMode};
pub use config::{Config, ConfigError};
pub use download::Downloader;
pub use error::{ProviderError, Result};
pub use generator::{ClipGenerator, GeneratorSettings};
pub use media::{ConcatOutput, FfmpegTool, MediaTool};
pub use retry::RetryPolicy;
pub use router::{BackendKind, ProviderRouter, Route};
pub use studio::ClipStudio;
pub use types::{
    AspectRatio, ChainResult, ClipRequest, DurationSource, GeneratedClip, MediaInput,
    RequestWarning,
};
