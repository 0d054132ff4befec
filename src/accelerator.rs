//! Accelerator detection and the environment handed to the engine.
//!
//! Nothing here touches the environment of this process. The CUDA settings
//! from [`AcceleratorConfig`] are returned as key/value pairs and applied to
//! the engine child process only.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::AcceleratorConfig;
use crate::job::Device;

pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";
pub const PYTORCH_CUDA_ALLOC_CONF: &str = "PYTORCH_CUDA_ALLOC_CONF";

const QUERY_FIELDS: &str = "--query-gpu=name,memory.total,driver_version";
const QUERY_FORMAT: &str = "--format=csv,noheader,nounits";

#[derive(Error, Debug)]
pub enum AcceleratorError {
    #[error("{binary} could not be run: {reason}")]
    NotInstalled { binary: String, reason: String },

    #[error("{binary} exited with {code:?}: {stderr}")]
    CommandFailed {
        binary: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected accelerator query output: {0}")]
    Parse(String),

    #[error("No accelerator device reported")]
    NoDevice,
}

/// First accelerator device as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub memory_mib: u64,
    pub driver_version: String,
}

impl AcceleratorInfo {
    pub fn memory_gib(&self) -> f64 {
        self.memory_mib as f64 / 1024.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcceleratorStatus {
    Available(AcceleratorInfo),
    Unavailable { reason: String },
}

/// Source of accelerator information
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AcceleratorProbe: Send + Sync {
    async fn query(&self) -> Result<AcceleratorInfo, AcceleratorError>;
}

/// Probe backed by `nvidia-smi`
pub struct NvidiaSmiProbe {
    binary: String,
}

impl NvidiaSmiProbe {
    pub fn new<S: Into<String>>(binary: S) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl AcceleratorProbe for NvidiaSmiProbe {
    async fn query(&self) -> Result<AcceleratorInfo, AcceleratorError> {
        let output = Command::new(&self.binary)
            .arg(QUERY_FIELDS)
            .arg(QUERY_FORMAT)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AcceleratorError::NotInstalled {
                binary: self.binary.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(AcceleratorError::CommandFailed {
                binary: self.binary.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_query_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the first device line of `nvidia-smi` csv output
pub fn parse_query_output(stdout: &str) -> Result<AcceleratorInfo, AcceleratorError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(AcceleratorError::NoDevice)?;

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 3 {
        return Err(AcceleratorError::Parse(line.to_string()));
    }

    let memory_mib = fields[1]
        .parse::<u64>()
        .map_err(|_| AcceleratorError::Parse(line.to_string()))?;

    Ok(AcceleratorInfo {
        name: fields[0].to_string(),
        memory_mib,
        driver_version: fields[2].to_string(),
    })
}

/// Detected accelerator plus the settings applied when the engine uses it
#[derive(Debug, Clone)]
pub struct AcceleratorSetup {
    config: AcceleratorConfig,
    status: AcceleratorStatus,
}

impl AcceleratorSetup {
    /// Query `probe` once. A failed query is logged and recorded as unavailable.
    pub async fn detect(config: AcceleratorConfig, probe: &dyn AcceleratorProbe) -> Self {
        let status = match probe.query().await {
            Ok(info) => {
                info!("GPU detected: {}", info.name);
                info!("GPU memory: {:.1} GB", info.memory_gib());
                AcceleratorStatus::Available(info)
            }
            Err(e) => {
                warn!("GPU not available, using CPU: {}", e);
                AcceleratorStatus::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        Self { config, status }
    }

    pub fn from_status(config: AcceleratorConfig, status: AcceleratorStatus) -> Self {
        Self { config, status }
    }

    /// Setup for hosts that should never use an accelerator
    pub fn cpu_only(config: AcceleratorConfig) -> Self {
        Self::from_status(
            config,
            AcceleratorStatus::Unavailable {
                reason: "disabled".to_string(),
            },
        )
    }

    pub fn status(&self) -> &AcceleratorStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, AcceleratorStatus::Available(_))
    }

    /// Environment for an engine process running on `device`
    pub fn child_environment(&self, device: Device) -> Vec<(String, String)> {
        if device != Device::Cuda {
            return Vec::new();
        }

        let mut env = Vec::new();
        if let Some(devices) = &self.config.visible_devices {
            env.push((CUDA_VISIBLE_DEVICES.to_string(), devices.clone()));
        }
        if let Some(alloc) = &self.config.alloc_conf {
            env.push((PYTORCH_CUDA_ALLOC_CONF.to_string(), alloc.clone()));
        }
        env
    }
}
