//! Subcommand handlers.

use std::path::Path;

use clipchain::config::default_path as get_config_path;
use clipchain::{
    ChainOptions, ClipRequest, ClipStudio, Config, DurationSource, GroundingMode, MediaInput,
    ProviderError,
};
use tokio_util::sync::CancellationToken;

use super::args::ConfigAction;
use super::enums::Aspect;

/// Render a library error for the terminal, with guidance when there is some.
fn describe(error: &ProviderError) -> String {
    match error.user_hint() {
        Some(hint) => format!("{}\n\n{}", error, hint),
        None => error.to_string(),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to create async runtime: {}", e))
}

fn studio(config: &Config) -> Result<ClipStudio, String> {
    ClipStudio::from_config(config).map_err(|e| format!("Failed to set up backends: {}", describe(&e)))
}

/// Read prompts from a file: one per line, blank lines and `#` comments skipped.
pub fn read_prompt_file(path: &Path) -> Result<Vec<String>, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read prompt file '{}': {}", path.display(), e))?;

    let prompts: Vec<String> = contents
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if prompts.is_empty() {
        return Err(format!(
            "No prompts found in '{}'. Expected one prompt per line.",
            path.display()
        ));
    }
    Ok(prompts)
}

/// Options for `clipchain generate`.
pub struct GenerateOptions<'a> {
    pub prompt: &'a str,
    pub model: Option<String>,
    pub duration: u32,
    pub aspect: Aspect,
    pub image: Option<&'a Path>,
    pub negative: Option<String>,
    pub output: &'a Path,
}

pub fn run_generate(
    config: &Config,
    options: GenerateOptions<'_>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let mut request = ClipRequest::new(options.prompt)
        .with_duration(options.duration)
        .with_aspect_ratio(options.aspect.into());
    if let Some(model) = options.model {
        request = request.with_model(model);
    }
    if let Some(negative) = options.negative {
        request = request.with_negative_prompt(negative);
    }
    if let Some(image) = options.image {
        let input = MediaInput::from_file(image)
            .map_err(|e| format!("Failed to read image '{}': {}", image.display(), e))?;
        request = request.with_reference_image(input);
    }

    let studio = studio(config)?;
    println!("Generating clip for: \"{}\"", options.prompt);

    let clip = runtime()?
        .block_on(studio.generate_clip(request, cancel))
        .map_err(|e| describe(&e))?;
    for warning in clip.warnings() {
        println!("Note: {}", warning);
    }

    clip.save(options.output)
        .map_err(|e| format!("Failed to write '{}': {}", options.output.display(), e))?;
    println!(
        "Saved {} ({} bytes, {}s)",
        options.output.display(),
        clip.size(),
        clip.duration_seconds()
    );
    Ok(())
}

/// Options for `clipchain video`.
pub struct VideoOptions<'a> {
    pub prompts: Vec<String>,
    pub model: Option<String>,
    pub clip_seconds: Option<u32>,
    pub overlap: Option<u32>,
    pub last_frame: bool,
    pub aspect: Aspect,
    pub output: &'a Path,
}

pub fn run_video(
    config: &Config,
    options: VideoOptions<'_>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let defaults = config.chain_options();
    let chain = ChainOptions {
        clip_seconds: options.clip_seconds.unwrap_or(defaults.clip_seconds),
        overlap_seconds: options.overlap.unwrap_or(defaults.overlap_seconds),
        aspect_ratio: options.aspect.into(),
        model: options.model,
        grounding: if options.last_frame {
            GroundingMode::LastFrame
        } else {
            GroundingMode::Clip
        },
        ..defaults
    };

    let studio = studio(config)?;
    let total = options.prompts.len();
    println!("Chaining {} clips", total);

    let result = runtime()?
        .block_on(studio.generate_video(&options.prompts, chain, cancel))
        .map_err(|e| describe(&e))?;

    for (i, clip) in result.per_clip.iter().enumerate() {
        match clip {
            Some(clip) => println!("[{}/{}] ok ({}s)", i + 1, total, clip.duration_seconds()),
            None => println!("[{}/{}] not generated", i + 1, total),
        }
    }

    let merged = match &result.merged_clip {
        Some(merged) => merged,
        None => {
            let reason = result
                .failure
                .as_ref()
                .map(describe)
                .unwrap_or_else(|| "no clips were generated".to_string());
            return Err(reason);
        }
    };

    merged
        .save(options.output)
        .map_err(|e| format!("Failed to write '{}': {}", options.output.display(), e))?;

    let source = match result.duration_source {
        DurationSource::Probed => "measured",
        DurationSource::Formula => "from overlap formula",
        DurationSource::Estimated => "estimated, clips were not joined",
    };
    println!(
        "Saved {} ({}s, {})",
        options.output.display(),
        result.total_duration_seconds,
        source
    );

    match &result.failure {
        Some(failure) => Err(format!(
            "Stopped after {} of {} clips: {}",
            result.succeeded(),
            total,
            describe(failure)
        )),
        None => Ok(()),
    }
}

/// Options for `clipchain batch`.
pub struct BatchOptions<'a> {
    pub file: &'a Path,
    pub out_dir: &'a Path,
    pub model: Option<String>,
    pub concurrency: Option<usize>,
    pub duration: u32,
    pub aspect: Aspect,
}

pub fn run_batch(
    config: &Config,
    options: BatchOptions<'_>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let prompts = read_prompt_file(options.file)?;
    std::fs::create_dir_all(options.out_dir).map_err(|e| {
        format!(
            "Failed to create output directory '{}': {}",
            options.out_dir.display(),
            e
        )
    })?;

    let requests: Vec<ClipRequest> = prompts
        .iter()
        .map(|prompt| {
            let request = ClipRequest::new(prompt.as_str())
                .with_duration(options.duration)
                .with_aspect_ratio(options.aspect.into());
            match &options.model {
                Some(model) => request.with_model(model.clone()),
                None => request,
            }
        })
        .collect();

    let mut studio = studio(config)?;
    if let Some(concurrency) = options.concurrency {
        studio = studio.with_batch_concurrency(concurrency);
    }

    println!(
        "Batch generation: {} prompts from '{}'",
        prompts.len(),
        options.file.display()
    );

    let results = runtime()?.block_on(studio.generate_clips_batch(requests, cancel));

    let total = results.len();
    let mut failed = 0;
    for (i, (prompt, result)) in prompts.iter().zip(results).enumerate() {
        let progress = format!("[{}/{}]", i + 1, total);
        match result {
            Ok(clip) => {
                let path = options
                    .out_dir
                    .join(format!("clip_{:03}.{}", i + 1, clip.file_extension()));
                match clip.save(&path) {
                    Ok(()) => println!("{} Saved {}: \"{}\"", progress, path.display(), prompt),
                    Err(e) => {
                        failed += 1;
                        println!("{} Failed to write {}: {}", progress, path.display(), e);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                println!("{} Failed: \"{}\": {}", progress, prompt, e);
            }
        }
    }

    println!();
    println!("Completed: {}, Failed: {}", total - failed, failed);
    if failed > 0 {
        return Err(format!("{} of {} clips failed", failed, total));
    }
    Ok(())
}

pub fn run_route(config: &Config, model: &str) -> Result<(), String> {
    let kind = clipchain::router::classify_model(model, &config.models.primary_prefixes)
        .map_err(|e| e.to_string())?;
    println!("{} -> {} backend", model, kind);
    Ok(())
}

/// Handle config subcommand actions against `path`, or the default location.
pub fn handle_config_action(action: ConfigAction, path: Option<&Path>) -> Result<(), String> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()
            .ok_or_else(|| "Could not determine the config directory".to_string())?,
    };

    match action {
        ConfigAction::Show => {
            let config = Config::load(path).map_err(|e| e.to_string())?;
            let rendered = config.to_toml().map_err(|e| e.to_string())?;
            println!("{}", rendered);
            if config_path.exists() {
                println!("# Config file: {} (exists)", config_path.display());
            } else {
                println!("# Config file: {} (not found, showing defaults)", config_path.display());
            }
            Ok(())
        }
        ConfigAction::Init => {
            if config_path.exists() {
                return Err(format!(
                    "Config file already exists: {}\nUse 'clipchain config show' to view current settings.",
                    config_path.display()
                ));
            }
            Config::default()
                .save(&config_path)
                .map_err(|e| e.to_string())?;
            println!("Created config file: {}", config_path.display());
            Ok(())
        }
    }
}
