use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::job::{JobResult, JobState, Progress, ProgressSink};

/// Finished jobs beyond this count are forgotten, oldest first
const MAX_TRACKED_JOBS: usize = 256;

/// Latest progress update, with the display hints the form needs
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub update: Progress,
    pub nominal_percent: u8,
    pub indeterminate: bool,
    pub message: String,
}

impl From<&Progress> for ProgressView {
    fn from(update: &Progress) -> Self {
        Self {
            update: update.clone(),
            nominal_percent: update.nominal_percent(),
            indeterminate: update.is_indeterminate(),
            message: update.message(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub success: bool,
    pub message: String,
    pub logs: String,
    pub download_url: Option<String>,
}

impl From<&JobResult> for ResultView {
    fn from(result: &JobResult) -> Self {
        let download_url = result
            .output_path
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|name| format!("/outputs/{}", name.to_string_lossy()));

        Self {
            success: result.success,
            message: result.message.clone(),
            logs: result.diagnostics.clone(),
            download_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub progress: Option<ProgressView>,
    pub result: Option<ResultView>,
}

/// In-memory view of submitted jobs, fed by runner progress updates
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobSnapshot>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, JobSnapshot>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, JobSnapshot>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a job that has not been validated yet
    pub fn insert(&self, job_id: Uuid) -> JobSnapshot {
        let snapshot = JobSnapshot {
            job_id,
            state: JobState::Idle,
            submitted_at: Utc::now(),
            progress: None,
            result: None,
        };

        let mut jobs = self.write();
        jobs.insert(job_id, snapshot.clone());
        evict_finished(&mut jobs);
        snapshot
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.read().get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Record the final result of a job
    pub fn complete(&self, result: &JobResult) {
        let mut jobs = self.write();
        if let Some(snapshot) = jobs.get_mut(&result.job_id) {
            snapshot.state = result.state;
            snapshot.result = Some(ResultView::from(result));
        }
    }
}

impl ProgressSink for JobRegistry {
    fn report(&self, job_id: Uuid, progress: &Progress) {
        let mut jobs = self.write();
        let Some(snapshot) = jobs.get_mut(&job_id) else {
            return;
        };

        if !snapshot.state.is_terminal() {
            snapshot.state = match progress {
                Progress::Validating => JobState::Validating,
                Progress::Queued => JobState::Queued,
                Progress::Started { .. } | Progress::Heartbeat { .. } | Progress::Finalizing => {
                    JobState::Running
                }
                Progress::Done { success: true } => JobState::Succeeded,
                Progress::Done { success: false } => JobState::Failed,
            };
        }
        snapshot.progress = Some(ProgressView::from(progress));
    }
}

fn evict_finished(jobs: &mut HashMap<Uuid, JobSnapshot>) {
    while jobs.len() > MAX_TRACKED_JOBS {
        let oldest = jobs
            .values()
            .filter(|s| s.state.is_terminal())
            .min_by_key(|s| s.submitted_at)
            .map(|s| s.job_id);
        match oldest {
            Some(id) => {
                jobs.remove(&id);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Device;
    use std::path::PathBuf;

    #[test]
    fn test_progress_drives_state() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(id);

        registry.report(id, &Progress::Validating);
        assert_eq!(registry.get(id).unwrap().state, JobState::Validating);

        registry.report(id, &Progress::Started { device: Device::Cpu });
        registry.report(
            id,
            &Progress::Heartbeat {
                tick: 0,
                elapsed_secs: 0,
                nominal_percent: 30,
            },
        );
        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.state, JobState::Running);
        assert!(snapshot.progress.unwrap().indeterminate);
    }

    #[test]
    fn test_complete_sets_download_url() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(id);

        registry.complete(&JobResult::succeeded(
            id,
            PathBuf::from("/srv/outputs/dubbed_1_abc.mp4"),
            "done".to_string(),
        ));

        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.state, JobState::Succeeded);
        assert_eq!(
            snapshot.result.unwrap().download_url.as_deref(),
            Some("/outputs/dubbed_1_abc.mp4")
        );
    }

    #[test]
    fn test_unknown_job_updates_are_ignored() {
        let registry = JobRegistry::new();
        registry.report(Uuid::new_v4(), &Progress::Queued);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finished_jobs_are_evicted_first() {
        let registry = JobRegistry::new();
        let first = Uuid::new_v4();
        registry.insert(first);
        registry.complete(&JobResult::failed(first, "x".to_string(), String::new()));

        for _ in 0..MAX_TRACKED_JOBS {
            registry.insert(Uuid::new_v4());
        }

        assert_eq!(registry.len(), MAX_TRACKED_JOBS);
        assert!(registry.get(first).is_none());
    }
}
