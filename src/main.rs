//! dubweb - browser front-end for an external video dubbing engine
//!
//! Entry point: parses the command line, sets up logging and configuration,
//! then either serves the dubbing form or runs one of the maintenance commands.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use dubweb::accelerator::{AcceleratorSetup, NvidiaSmiProbe};
use dubweb::cli::{Args, Commands, OutputsAction};
use dubweb::config::Config;
use dubweb::engine::EngineFactory;
use dubweb::error::DubError;
use dubweb::job::{JobRequest, JobRunner, Progress, ProgressSink, TtsEngine};
use dubweb::server::{self, AppState};
use dubweb::system_info::SystemInfo;
use dubweb::{languages, media_info, outputs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the file writer alive for the whole run
    let _log_guard = setup_logging(args.verbose)?;

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Serve { host, port, no_gpu } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let runner = Arc::new(build_runner(&config, no_gpu).await?);
            let state = AppState::new(runner, config.jobs.upload_dir.clone());
            for line in state.system_info.lines() {
                info!("{}", line);
            }
            server::serve(&config.server, state).await?;
        }
        Commands::Dub {
            input,
            target_lang,
            source_lang,
            token,
            tts_engine,
            cpu,
        } => {
            let tts_engine: TtsEngine = tts_engine.parse().map_err(DubError::Config)?;
            if languages::find(&target_lang).is_none() {
                warn!("Target language '{}' is not one of the form's choices", target_lang);
            }

            let runner = build_runner(&config, cpu).await?;
            let request = JobRequest {
                input_file: Some(input),
                target_language: target_lang,
                source_language: source_lang,
                token: token.unwrap_or_default(),
                tts_engine,
                prefer_gpu: !cpu,
            };

            let spinner = SpinnerProgress::new();
            let result = runner.submit(&request, &spinner).await;
            spinner.finish();

            println!("{}", result.message);
            if !result.success {
                if !result.diagnostics.trim().is_empty() && !result.message.contains(&result.diagnostics) {
                    eprintln!("{}", result.diagnostics);
                }
                anyhow::bail!("Dubbing job {} failed", result.job_id);
            }
        }
        Commands::Info => {
            let accelerator = detect_accelerator(&config, false).await;
            let info = SystemInfo::collect(&accelerator, config.engine.display_command());
            println!("{}", info.render());
        }
        Commands::Probe { input } => {
            let info = media_info::probe(&config.media.ffprobe_path, &input).await?;
            println!("Duration: {}", info.duration_str);
            println!("Size: {}", info.size_str);
        }
        Commands::Check => {
            let engine = EngineFactory::create_engine(config.engine.clone());
            engine.check_availability().await?;
            println!("Engine OK: {}", engine.describe());

            match media_info::check_availability(&config.media.ffprobe_path).await {
                Ok(version) => println!("ffprobe OK: {}", version),
                Err(e) => {
                    warn!("{}", e);
                    println!("ffprobe not available; input details will not be logged");
                }
            }
        }
        Commands::Outputs { action } => match action {
            OutputsAction::List => {
                let artifacts = outputs::list(&config.jobs.output_dir)?;
                if artifacts.is_empty() {
                    println!("No dubbed files found in {}", config.jobs.output_dir.display());
                } else {
                    println!("{:<60} {:<10} {:<20}", "File", "Size (MB)", "Modified");
                    println!("{}", "-".repeat(92));
                    for artifact in artifacts {
                        println!(
                            "{:<60} {:<10.1} {:<20}",
                            artifact.name,
                            artifact.size_mb(),
                            artifact.modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }
            OutputsAction::Prune { days } => {
                let removed = outputs::prune(&config.jobs.output_dir, days)?;
                println!("Removed {} dubbed files older than {} days", removed, days);
            }
        },
        Commands::InitConfig { output, force } => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

/// Load configuration: explicit path, then ./config.toml, then defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

async fn detect_accelerator(config: &Config, cpu_only: bool) -> AcceleratorSetup {
    if cpu_only {
        info!("GPU use disabled from the command line");
        return AcceleratorSetup::cpu_only(config.accelerator.clone());
    }
    let probe = NvidiaSmiProbe::new(&config.accelerator.probe_binary);
    AcceleratorSetup::detect(config.accelerator.clone(), &probe).await
}

async fn build_runner(config: &Config, cpu_only: bool) -> Result<JobRunner> {
    let accelerator = detect_accelerator(config, cpu_only).await;
    let engine = EngineFactory::create_engine(config.engine.clone());
    Ok(JobRunner::new(config, engine, accelerator)?)
}

/// Renders job updates on a terminal spinner
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for SpinnerProgress {
    fn report(&self, _job_id: Uuid, progress: &Progress) {
        self.bar.set_message(progress.message());
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".dubweb").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dubweb.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("dubweb.log").display());

    Ok(guard)
}
