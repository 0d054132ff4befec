use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{DubError, Result};

/// 500 MiB upload ceiling.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;

fn default_supported_formats() -> Vec<String> {
    [".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_concurrent_jobs() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub jobs: JobsConfig,
    pub accelerator: AcceleratorConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the form is served on
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Program that runs the dubbing engine (e.g., python)
    pub program: String,
    /// Arguments placed before the job flags (e.g., ["-m", "open_dubbing"])
    pub base_args: Vec<String>,
    /// Interval between heartbeat updates while the engine runs
    pub poll_interval_ms: u64,
    /// Nominal percent of the first heartbeat
    pub heartbeat_start: u8,
    /// Nominal percent the heartbeat ramp stops at
    pub heartbeat_end: u8,
    /// Increment of the nominal percent per heartbeat
    pub heartbeat_step: u8,
    /// Kill the engine after this many seconds. None waits forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Directory the engine writes dubbed files into
    pub output_dir: PathBuf,
    /// Directory uploads are staged in until their job finishes
    pub upload_dir: PathBuf,
    /// Largest accepted input file in bytes
    pub max_file_size: u64,
    /// Accepted container extensions, with leading dot
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
    /// Engine processes allowed to run at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceleratorConfig {
    /// Binary queried for accelerator name and memory
    pub probe_binary: String,
    /// CUDA_VISIBLE_DEVICES handed to the engine when it runs on cuda
    pub visible_devices: Option<String>,
    /// PYTORCH_CUDA_ALLOC_CONF handed to the engine when it runs on cuda
    pub alloc_conf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffprobe binary
    pub ffprobe_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 7860,
            },
            engine: EngineConfig {
                program: "python".to_string(),
                base_args: vec!["-m".to_string(), "open_dubbing".to_string()],
                poll_interval_ms: 2000,
                heartbeat_start: 30,
                heartbeat_end: 90,
                heartbeat_step: 5,
                timeout_secs: None,
            },
            jobs: JobsConfig {
                output_dir: PathBuf::from("./outputs"),
                upload_dir: PathBuf::from("./uploads"),
                max_file_size: DEFAULT_MAX_FILE_SIZE,
                supported_formats: default_supported_formats(),
                max_concurrent_jobs: default_max_concurrent_jobs(),
            },
            accelerator: AcceleratorConfig {
                probe_binary: "nvidia-smi".to_string(),
                visible_devices: Some("0".to_string()),
                alloc_conf: Some("max_split_size_mb:128".to_string()),
            },
            media: MediaConfig {
                ffprobe_path: "ffprobe".to_string(),
            },
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Program and base arguments as a single display string
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DubError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values the runner cannot work with
    pub fn check(&self) -> Result<()> {
        if self.engine.program.trim().is_empty() {
            return Err(DubError::Config("engine.program must not be empty".to_string()));
        }
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(DubError::Config("jobs.max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.engine.heartbeat_step == 0 || self.engine.heartbeat_start > self.engine.heartbeat_end {
            return Err(DubError::Config(format!(
                "Invalid heartbeat band {}..{} step {}",
                self.engine.heartbeat_start, self.engine.heartbeat_end, self.engine.heartbeat_step
            )));
        }
        if self.jobs.supported_formats.is_empty() {
            return Err(DubError::Config("jobs.supported_formats must not be empty".to_string()));
        }
        Ok(())
    }
}
