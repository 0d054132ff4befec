// Dubbing job model and runner
//
// - Validate: single-error input checks
// - Naming: collision-free output file names
// - Progress: heartbeat updates emitted while the engine runs
// - Runner: launch, wait, and classify one job

pub mod naming;
pub mod progress;
pub mod runner;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

pub use naming::*;
pub use progress::*;
pub use runner::*;
pub use validate::*;

/// Source language value that lets the engine detect the language itself
pub const AUTO_LANGUAGE: &str = "auto";

/// Text-to-speech backend the engine should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngine {
    /// Edge TTS: fast, remote
    #[default]
    Edge,
    /// OpenAI TTS: best quality, remote
    OpenAi,
    /// Coqui TTS: local
    Coqui,
}

impl TtsEngine {
    pub const ALL: [TtsEngine; 3] = [TtsEngine::Edge, TtsEngine::OpenAi, TtsEngine::Coqui];

    pub fn as_str(&self) -> &'static str {
        match self {
            TtsEngine::Edge => "edge",
            TtsEngine::OpenAi => "openai",
            TtsEngine::Coqui => "coqui",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TtsEngine::Edge => "Edge TTS (fast)",
            TtsEngine::OpenAi => "OpenAI TTS (best)",
            TtsEngine::Coqui => "Coqui TTS (local)",
        }
    }
}

impl fmt::Display for TtsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TtsEngine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "edge" => Ok(TtsEngine::Edge),
            "openai" => Ok(TtsEngine::OpenAi),
            "coqui" => Ok(TtsEngine::Coqui),
            other => Err(format!(
                "Invalid TTS engine '{}'. Valid engines: edge, openai, coqui",
                other
            )),
        }
    }
}

/// Compute device passed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }

    /// GPU only when the user asked for it and one was detected
    pub fn select(prefer_gpu: bool, accelerator_available: bool) -> Self {
        if prefer_gpu && accelerator_available {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one dubbing submission
#[derive(Clone)]
pub struct JobRequest {
    pub input_file: Option<PathBuf>,
    pub target_language: String,
    pub source_language: String,
    /// Hugging Face token forwarded to the engine
    pub token: String,
    pub tts_engine: TtsEngine,
    pub prefer_gpu: bool,
}

impl JobRequest {
    pub fn new<P: Into<PathBuf>>(input_file: P, target_language: &str, token: &str) -> Self {
        Self {
            input_file: Some(input_file.into()),
            target_language: target_language.to_string(),
            source_language: AUTO_LANGUAGE.to_string(),
            token: token.to_string(),
            tts_engine: TtsEngine::default(),
            prefer_gpu: true,
        }
    }

    /// Explicit source language, or None when the engine should detect it
    pub fn explicit_source_language(&self) -> Option<&str> {
        let source = self.source_language.trim();
        if source.is_empty() || source.eq_ignore_ascii_case(AUTO_LANGUAGE) {
            None
        } else {
            Some(source)
        }
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("input_file", &self.input_file)
            .field("target_language", &self.target_language)
            .field("source_language", &self.source_language)
            .field("token", &"<redacted>")
            .field("tts_engine", &self.tts_engine)
            .field("prefer_gpu", &self.prefer_gpu)
            .finish()
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Validating,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Outcome of one submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub success: bool,
    pub output_path: Option<PathBuf>,
    /// Status text shown to the user
    pub message: String,
    /// Raw engine diagnostics (stderr or error description)
    pub diagnostics: String,
    pub state: JobState,
}

impl JobResult {
    pub fn succeeded(job_id: Uuid, output_path: PathBuf, message: String) -> Self {
        Self {
            job_id,
            success: true,
            output_path: Some(output_path),
            message,
            diagnostics: String::new(),
            state: JobState::Succeeded,
        }
    }

    pub fn failed(job_id: Uuid, message: String, diagnostics: String) -> Self {
        Self {
            job_id,
            success: false,
            output_path: None,
            message,
            diagnostics,
            state: JobState::Failed,
        }
    }
}
