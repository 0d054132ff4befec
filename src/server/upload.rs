//! Multipart form parsing for job submissions.
//!
//! The video is streamed to a private staging directory under the upload
//! directory. The directory is removed when the returned [`TempDir`] drops,
//! which the submit handler delays until the job has finished.

use axum::extract::multipart::{Field, Multipart};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::job::{JobRequest, TtsEngine, ValidationError, AUTO_LANGUAGE};
use super::error::{AppError, AppResult};

/// Largest accepted value for a text field (4 KiB)
const MAX_TEXT_FIELD_BYTES: usize = 4 * 1024;

/// A parsed submission plus the staging directory holding its upload
pub struct SubmitForm {
    pub request: JobRequest,
    pub staging: Option<TempDir>,
}

/// Read the submission form, staging the video under `upload_dir`.
///
/// Uploads larger than `max_file_size` are rejected while streaming.
pub async fn receive(
    upload_dir: &Path,
    max_file_size: u64,
    mut multipart: Multipart,
) -> AppResult<SubmitForm> {
    let mut request = JobRequest {
        input_file: None,
        target_language: String::new(),
        source_language: AUTO_LANGUAGE.to_string(),
        token: String::new(),
        tts_engine: TtsEngine::default(),
        prefer_gpu: false,
    };
    let mut staging = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "video" => {
                let Some(file_name) = field.file_name().and_then(sanitize_file_name) else {
                    continue;
                };

                tokio::fs::create_dir_all(upload_dir).await?;
                let dir = tempfile::Builder::new()
                    .prefix("upload-")
                    .tempdir_in(upload_dir)?;
                let path = dir.path().join(&file_name);

                let mut file = File::create(&path).await?;
                let mut written: u64 = 0;
                while let Some(chunk) = field.chunk().await? {
                    written += chunk.len() as u64;
                    if written > max_file_size {
                        return Err(AppError::Validation(
                            ValidationError::FileTooLarge {
                                size: written,
                                max_mib: max_file_size / 1024 / 1024,
                            }
                            .to_string(),
                        ));
                    }
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                debug!("Staged upload {} ({} bytes)", path.display(), written);

                request.input_file = Some(path);
                staging = Some(dir);
            }
            "target_language" => request.target_language = read_text(field, &name).await?,
            "source_language" => {
                let text = read_text(field, &name).await?;
                if !text.trim().is_empty() {
                    request.source_language = text;
                }
            }
            "token" => request.token = read_text(field, &name).await?,
            "tts_engine" => {
                let text = read_text(field, &name).await?;
                if !text.trim().is_empty() {
                    request.tts_engine = text.parse().map_err(AppError::BadRequest)?;
                }
            }
            "use_gpu" => request.prefer_gpu = parse_checkbox(&read_text(field, &name).await?),
            _ => {} // ignore unknown fields
        }
    }

    Ok(SubmitForm { request, staging })
}

/// Read a text field, rejecting values over [`MAX_TEXT_FIELD_BYTES`]
async fn read_text(mut field: Field<'_>, name: &str) -> AppResult<String> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::BadRequest(format!("Field '{}' is too long", name)));
        }
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map_err(|_| AppError::BadRequest(format!("Field '{}' is not valid UTF-8", name)))
}

/// Keep only the final path component of a client-supplied file name
fn sanitize_file_name(name: &str) -> Option<PathBuf> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(PathBuf::from(base))
    }
}

fn parse_checkbox(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "on" | "true" | "1" | "yes"
    )
}
