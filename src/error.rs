use thiserror::Error;

use crate::engine::EngineError;
use crate::job::ValidationError;

#[derive(Error, Debug)]
pub enum DubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dubbing engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Media probe error: {0}")]
    MediaProbe(String),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),
}

pub type Result<T> = std::result::Result<T, DubError>;
