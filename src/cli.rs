use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the dubbing form in the browser
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Never run the engine on the GPU
        #[arg(long)]
        no_gpu: bool,
    },

    /// Dub a single video file from the command line
    Dub {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Language to dub into
        #[arg(short, long, default_value = "por")]
        target_lang: String,

        /// Spoken language of the video, or auto to detect it
        #[arg(short, long, default_value = "auto")]
        source_lang: String,

        /// Hugging Face token
        #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Text-to-speech engine (edge, openai, coqui)
        #[arg(long, default_value = "edge")]
        tts_engine: String,

        /// Run the engine on the CPU even when a GPU is available
        #[arg(long)]
        cpu: bool,
    },

    /// Show accelerator and engine information
    Info,

    /// Print duration and size of a video file
    Probe {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Check that the dubbing engine and ffprobe can be started
    Check,

    /// Manage dubbed files in the output directory
    Outputs {
        #[command(subcommand)]
        action: OutputsAction,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum OutputsAction {
    /// List dubbed files, newest first
    List,

    /// Delete dubbed files older than the given age
    Prune {
        /// Age in days (default: 30)
        #[arg(short, long, default_value = "30")]
        days: u64,
    },
}
