//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::enums::Aspect;

/// Generate video clips with remote models and chain them into longer videos
#[derive(Parser, Debug)]
#[command(name = "clipchain")]
#[command(version, about = "Generate and chain AI video clips", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a single clip
    Generate {
        /// Text prompt describing the clip
        prompt: String,

        /// Model identifier (e.g. veo-3.1 or vendor/model)
        #[arg(long, short)]
        model: Option<String>,

        /// Clip length in seconds (clamped to what the model supports)
        #[arg(long, short, default_value = "8")]
        duration: u32,

        /// Aspect ratio
        #[arg(long, short, default_value = "16:9")]
        aspect: Aspect,

        /// Reference image for the first frame
        #[arg(long)]
        image: Option<PathBuf>,

        /// Things the model should avoid
        #[arg(long)]
        negative: Option<String>,

        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Generate one clip per prompt, each continuing the last, and join them
    Video {
        /// Prompts, in order
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        prompts: Vec<String>,

        /// Read prompts from a file (one per line, # comments)
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Model identifier
        #[arg(long, short)]
        model: Option<String>,

        /// Length of the first clip in seconds
        #[arg(long)]
        clip_seconds: Option<u32>,

        /// Seconds each clip overlaps the previous one
        #[arg(long)]
        overlap: Option<u32>,

        /// Ground on the previous clip's last frame instead of the clip itself
        #[arg(long)]
        last_frame: bool,

        /// Aspect ratio
        #[arg(long, short, default_value = "16:9")]
        aspect: Aspect,

        /// Output file
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Generate independent clips from a prompt file
    Batch {
        /// Prompt file (one per line, # comments)
        #[arg(long, short)]
        file: PathBuf,

        /// Directory for the generated clips
        #[arg(long)]
        out_dir: PathBuf,

        /// Model identifier
        #[arg(long, short)]
        model: Option<String>,

        /// Clips in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Clip length in seconds
        #[arg(long, short, default_value = "8")]
        duration: u32,

        /// Aspect ratio
        #[arg(long, short, default_value = "16:9")]
        aspect: Aspect,
    },

    /// Show which backend serves a model identifier
    Route {
        /// Model identifier
        model: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Create default config file
    Init,
}
