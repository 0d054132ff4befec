use std::path::Path;
use thiserror::Error;

use crate::config::JobsConfig;
use super::JobRequest;

pub const VALIDATION_OK: &str = "Validation ok";

/// First problem found with a job request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a video file")]
    MissingFile,

    #[error("Hugging Face token is required")]
    MissingToken,

    #[error("Please select a target language")]
    MissingTargetLanguage,

    #[error("Cannot read {path}: {reason}")]
    UnreadableFile { path: String, reason: String },

    #[error("File too large (max: {max_mib}MB)")]
    FileTooLarge { size: u64, max_mib: u64 },

    #[error("Unsupported format. Use: {supported}")]
    UnsupportedFormat { supported: String },
}

/// Input checks applied before any engine process is launched
#[derive(Debug, Clone)]
pub struct Validator {
    max_file_size: u64,
    supported_formats: Vec<String>,
}

impl Validator {
    pub fn new(max_file_size: u64, supported_formats: Vec<String>) -> Self {
        let supported_formats = supported_formats
            .into_iter()
            .map(|f| {
                let f = f.trim().to_lowercase();
                if f.starts_with('.') { f } else { format!(".{}", f) }
            })
            .collect();

        Self {
            max_file_size,
            supported_formats,
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.max_file_size, config.supported_formats.clone())
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn supported_formats(&self) -> &[String] {
        &self.supported_formats
    }

    /// Check a request, cheapest checks first, stopping at the first failure.
    ///
    /// Order: file presence, token, target language, file size, extension.
    pub fn validate(&self, request: &JobRequest) -> std::result::Result<(), ValidationError> {
        let input = request
            .input_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ValidationError::MissingFile)?;

        if request.token.trim().is_empty() {
            return Err(ValidationError::MissingToken);
        }

        if request.target_language.trim().is_empty() {
            return Err(ValidationError::MissingTargetLanguage);
        }

        let metadata = std::fs::metadata(input).map_err(|e| ValidationError::UnreadableFile {
            path: input.display().to_string(),
            reason: e.to_string(),
        })?;

        if metadata.len() > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size: metadata.len(),
                max_mib: self.max_file_size / 1024 / 1024,
            });
        }

        if !self.has_supported_extension(input) {
            return Err(ValidationError::UnsupportedFormat {
                supported: self.supported_formats.join(", "),
            });
        }

        Ok(())
    }

    /// Validate and render the outcome as the (ok, message) pair the form shows
    pub fn check(&self, request: &JobRequest) -> (bool, String) {
        match self.validate(request) {
            Ok(()) => (true, VALIDATION_OK.to_string()),
            Err(e) => (false, e.to_string()),
        }
    }

    fn has_supported_extension(&self, path: &Path) -> bool {
        let name = path.to_string_lossy().to_lowercase();
        self.supported_formats.iter().any(|ext| name.ends_with(ext.as_str()))
    }
}
