use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{DubError, Result};

/// Basic facts about an input video
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// Duration as m:ss
    pub duration_str: String,
    /// Size as x.yMB
    pub size_str: String,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
}

impl MediaInfo {
    pub fn new(duration_secs: f64, size_bytes: u64) -> Self {
        let whole = duration_secs.max(0.0).round() as u64;
        Self {
            duration_secs,
            size_bytes,
            duration_str: format!("{}:{:02}", whole / 60, whole % 60),
            size_str: format!("{:.1}MB", size_bytes as f64 / 1024.0 / 1024.0),
        }
    }

    /// Build from `ffprobe -print_format json -show_format` output
    pub fn from_ffprobe_json(json: &str) -> Result<Self> {
        let parsed: ProbeOutput = serde_json::from_str(json)?;
        let duration = parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);
        let size = parsed
            .format
            .size
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(Self::new(duration, size))
    }
}

/// Run ffprobe against `path`
pub async fn probe<P: AsRef<Path>>(ffprobe: &str, path: P) -> Result<MediaInfo> {
    let path = path.as_ref();
    debug!("Probing {} with {}", path.display(), ffprobe);

    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .await
        .map_err(|e| DubError::MediaProbe(format!("Failed to execute {}: {}", ffprobe, e)))?;

    if !output.status.success() {
        return Err(DubError::MediaProbe(format!(
            "{} could not read {}: {}",
            ffprobe,
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    MediaInfo::from_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Check that ffprobe starts, returning its version banner
pub async fn check_availability(ffprobe: &str) -> Result<String> {
    let output = Command::new(ffprobe)
        .arg("-version")
        .output()
        .await
        .map_err(|e| DubError::MediaProbe(format!("ffprobe not found: {}", e)))?;

    if !output.status.success() {
        return Err(DubError::MediaProbe("ffprobe version check failed".to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}
