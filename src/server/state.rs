use std::path::PathBuf;
use std::sync::Arc;

use crate::job::JobRunner;
use crate::system_info::SystemInfo;
use super::registry::JobRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    pub jobs: Arc<JobRegistry>,
    /// Directory uploads are staged in while their job runs
    pub upload_dir: Arc<PathBuf>,
    pub system_info: Arc<SystemInfo>,
}

impl AppState {
    pub fn new(runner: Arc<JobRunner>, upload_dir: PathBuf) -> Self {
        let system_info = SystemInfo::collect(runner.accelerator(), runner.engine().describe());
        Self {
            runner,
            jobs: Arc::new(JobRegistry::new()),
            upload_dir: Arc::new(upload_dir),
            system_info: Arc::new(system_info),
        }
    }
}
