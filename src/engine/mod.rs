// External dubbing engine integration
//
// The engine is a black-box command line tool. This module only knows how to
// build its command line, launch it, keep a heartbeat going while it runs,
// and collect what it printed:
// - Commands: command builders and abstractions
// - Process: subprocess-backed engine implementation

pub mod command;
pub mod process;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use command::*;
pub use process::*;

use crate::config::EngineConfig;
use crate::job::{Device, ProgressSink, TtsEngine};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Processing timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("{description} failed: {stderr}")]
    CheckFailed { description: String, stderr: String },
}

/// Everything the engine needs to dub one file
#[derive(Clone)]
pub struct EngineInvocation {
    pub input_file: PathBuf,
    pub target_language: String,
    /// None lets the engine detect the language
    pub source_language: Option<String>,
    pub token: String,
    pub output_dir: PathBuf,
    pub output_name: String,
    pub tts_engine: TtsEngine,
    pub device: Device,
}

impl EngineInvocation {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_name)
    }
}

/// What the engine process left behind once it exited
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// None when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Main trait for dubbing engine operations
#[async_trait]
pub trait DubbingEngine: Send + Sync {
    /// Run one dubbing job to completion, reporting heartbeats while it runs
    async fn run(
        &self,
        job_id: Uuid,
        invocation: &EngineInvocation,
        env: &[(String, String)],
        progress: &dyn ProgressSink,
    ) -> Result<ProcessOutput, EngineError>;

    /// Check that the engine can be started
    async fn check_availability(&self) -> Result<(), EngineError>;

    /// Human readable engine command, without job arguments
    fn describe(&self) -> String;
}

/// Factory for creating dubbing engine instances
pub struct EngineFactory;

impl EngineFactory {
    /// Create the default engine implementation (subprocess-based)
    pub fn create_engine(config: EngineConfig) -> Arc<dyn DubbingEngine> {
        Arc::new(process::ProcessEngine::new(config))
    }
}
