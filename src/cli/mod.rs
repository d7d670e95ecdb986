//! Command-line interface definitions and helpers.
//!
//! This module contains all CLI argument parsing, enums, and subcommand handlers.

mod args;
mod commands;
mod enums;

pub use args::{Args, Command};
pub use commands::{
    handle_config_action, read_prompt_file, run_batch, run_generate, run_route, run_video,
    BatchOptions, GenerateOptions, VideoOptions,
};
