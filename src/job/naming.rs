use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix shared by every file the engine is asked to produce
pub const OUTPUT_PREFIX: &str = "dubbed_";

/// Output file name for a job submitted at `submitted_at`.
///
/// The job id keeps names distinct for submissions within the same second.
pub fn output_file_name(job_id: Uuid, submitted_at: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}.mp4",
        OUTPUT_PREFIX,
        submitted_at.timestamp(),
        job_id.simple()
    )
}

/// Whether a file name looks like something this service produced
pub fn is_output_file_name(name: &str) -> bool {
    name.starts_with(OUTPUT_PREFIX) && name.ends_with(".mp4")
}
