use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::job::is_output_file_name;

/// A dubbed file sitting in the output directory
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    /// Path relative to the output directory
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl OutputArtifact {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Dubbed files under `dir`, newest first. A missing directory is empty.
pub fn list<P: AsRef<Path>>(dir: P) -> Result<Vec<OutputArtifact>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable output entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !is_output_file_name(&file_name) {
            continue;
        }

        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = pathdiff::diff_paths(entry.path(), dir)
            .unwrap_or_else(|| PathBuf::from(entry.file_name()))
            .to_string_lossy()
            .to_string();

        artifacts.push(OutputArtifact {
            name,
            path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified,
        });
    }

    artifacts.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(artifacts)
}

/// Delete dubbed files older than `days`. Returns how many were removed.
pub fn prune<P: AsRef<Path>>(dir: P, days: u64) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(days as i64);
    let mut removed = 0;

    for artifact in list(dir)? {
        if artifact.modified >= cutoff {
            continue;
        }
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => {
                info!("Removed {}", artifact.path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", artifact.path.display(), e),
        }
    }

    Ok(removed)
}
