mod cli;

use clap::Parser;
use clipchain::Config;
use cli::{Args, BatchOptions, Command, GenerateOptions, VideoOptions};
use tokio_util::sync::CancellationToken;

fn load_env() {
    // Load .env file, don't override existing env vars
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clipchain=info"));
    // Also installs the log -> tracing bridge for the library's log records.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn setup_ctrlc_handler(cancel: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("\nReceived second Ctrl+C, exiting.");
            std::process::exit(130);
        }
        eprintln!("\nReceived Ctrl+C, cancelling...");
        cancel.cancel();
    })
}

fn run(args: Args, cancel: &CancellationToken) -> Result<(), String> {
    // `config init` must work before the file exists
    if let Command::Config { action } = args.command {
        return cli::handle_config_action(action, args.config.as_deref());
    }

    // If --config is specified, require the file to exist
    let config = Config::load(args.config.as_deref()).map_err(|e| e.to_string())?;

    match args.command {
        Command::Generate {
            prompt,
            model,
            duration,
            aspect,
            image,
            negative,
            output,
        } => cli::run_generate(
            &config,
            GenerateOptions {
                prompt: &prompt,
                model,
                duration,
                aspect,
                image: image.as_deref(),
                negative,
                output: &output,
            },
            cancel,
        ),
        Command::Video {
            prompts,
            file,
            model,
            clip_seconds,
            overlap,
            last_frame,
            aspect,
            output,
        } => {
            let prompts = match file {
                Some(file) => cli::read_prompt_file(&file)?,
                None => prompts,
            };
            cli::run_video(
                &config,
                VideoOptions {
                    prompts,
                    model,
                    clip_seconds,
                    overlap,
                    last_frame,
                    aspect,
                    output: &output,
                },
                cancel,
            )
        }
        Command::Batch {
            file,
            out_dir,
            model,
            concurrency,
            duration,
            aspect,
        } => cli::run_batch(
            &config,
            BatchOptions {
                file: &file,
                out_dir: &out_dir,
                model,
                concurrency,
                duration,
                aspect,
            },
            cancel,
        ),
        Command::Route { model } => cli::run_route(&config, &model),
        // handled before loading
        Command::Config { .. } => Ok(()),
    }
}

fn main() {
    // Load .env file before anything else
    load_env();
    init_logging();

    let args = Args::parse();

    let cancel = CancellationToken::new();
    if let Err(e) = setup_ctrlc_handler(cancel.clone()) {
        log::warn!("Could not install Ctrl+C handler: {}", e);
    }

    if let Err(e) = run(args, &cancel) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
