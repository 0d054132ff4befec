use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accelerator::AcceleratorSetup;
use crate::config::Config;
use crate::engine::{DubbingEngine, EngineError, EngineInvocation, ProcessOutput};
use crate::error::{DubError, Result};
use crate::media_info;
use super::{
    output_file_name, Device, JobRequest, JobResult, Progress, ProgressSink, ValidationError,
    Validator,
};

pub const OUTPUT_MISSING: &str = "Output file not found";

/// Runs dubbing jobs against the external engine.
///
/// Each submission goes Validating -> Queued -> Running -> Succeeded/Failed.
/// At most `max_concurrent_jobs` engine processes run at once; later
/// submissions wait for a free slot. Failures are never retried.
pub struct JobRunner {
    output_dir: PathBuf,
    ffprobe_path: String,
    validator: Validator,
    engine: Arc<dyn DubbingEngine>,
    accelerator: AcceleratorSetup,
    slots: Semaphore,
}

impl JobRunner {
    pub fn new(
        config: &Config,
        engine: Arc<dyn DubbingEngine>,
        accelerator: AcceleratorSetup,
    ) -> Result<Self> {
        config.check()?;
        std::fs::create_dir_all(&config.jobs.output_dir)?;

        Ok(Self {
            output_dir: config.jobs.output_dir.clone(),
            ffprobe_path: config.media.ffprobe_path.clone(),
            validator: Validator::from_config(&config.jobs),
            engine,
            accelerator,
            slots: Semaphore::new(config.jobs.max_concurrent_jobs),
        })
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn accelerator(&self) -> &AcceleratorSetup {
        &self.accelerator
    }

    pub fn engine(&self) -> &Arc<dyn DubbingEngine> {
        &self.engine
    }

    /// Run one job under a fresh id
    pub async fn submit(&self, request: &JobRequest, progress: &dyn ProgressSink) -> JobResult {
        self.submit_with_id(Uuid::new_v4(), request, progress).await
    }

    /// Run one job to completion and classify its outcome.
    ///
    /// Never returns an error: every failure becomes a failed [`JobResult`].
    pub async fn submit_with_id(
        &self,
        job_id: Uuid,
        request: &JobRequest,
        progress: &dyn ProgressSink,
    ) -> JobResult {
        progress.report(job_id, &Progress::Validating);

        let result = match self.validator.validate(request) {
            Err(e) => {
                warn!("Job {} rejected: {}", job_id, e);
                JobResult::failed(job_id, e.to_string(), String::new())
            }
            Ok(()) => match self.execute(job_id, request, progress).await {
                Ok(result) => result,
                Err(e) => {
                    let message = format!("Unexpected error: {}", e);
                    error!("Job {}: {}", job_id, message);
                    JobResult::failed(job_id, message, e.to_string())
                }
            },
        };

        progress.report(job_id, &Progress::Done { success: result.success });
        result
    }

    async fn execute(
        &self,
        job_id: Uuid,
        request: &JobRequest,
        progress: &dyn ProgressSink,
    ) -> Result<JobResult> {
        let input_file = request
            .input_file
            .clone()
            .ok_or(ValidationError::MissingFile)?;

        let device = Device::select(request.prefer_gpu, self.accelerator.is_available());
        let invocation = EngineInvocation {
            input_file,
            target_language: request.target_language.trim().to_string(),
            source_language: request.explicit_source_language().map(str::to_string),
            token: request.token.trim().to_string(),
            output_dir: self.output_dir.clone(),
            output_name: output_file_name(job_id, Utc::now()),
            tts_engine: request.tts_engine,
            device,
        };

        self.log_media_info(job_id, &invocation.input_file).await;
        fs::create_dir_all(&self.output_dir).await?;

        let _permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                info!("Job {} waiting for a free engine slot", job_id);
                progress.report(job_id, &Progress::Queued);
                self.slots
                    .acquire()
                    .await
                    .map_err(|_| DubError::Config("Job queue is closed".to_string()))?
            }
        };

        info!(
            "Job {} running: {} -> {} on {}",
            job_id,
            invocation.input_file.display(),
            invocation.output_name,
            device
        );
        progress.report(job_id, &Progress::Started { device });

        let env = self.accelerator.child_environment(device);
        let output = match self.engine.run(job_id, &invocation, &env, progress).await {
            Ok(output) => output,
            Err(e @ EngineError::TimedOut { .. }) => {
                warn!("Job {}: {}", job_id, e);
                return Ok(JobResult::failed(job_id, e.to_string(), e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        progress.report(job_id, &Progress::Finalizing);
        Ok(classify(job_id, &invocation.output_path(), &output).await)
    }

    async fn log_media_info(&self, job_id: Uuid, input: &Path) {
        if self.ffprobe_path.is_empty() {
            return;
        }
        match media_info::probe(&self.ffprobe_path, input).await {
            Ok(info) => info!(
                "Job {} input: duration {}, size {}",
                job_id, info.duration_str, info.size_str
            ),
            Err(e) => warn!("Job {}: could not probe input: {}", job_id, e),
        }
    }
}

/// Turn a finished engine run into a job result.
///
/// Exit 0 with the file in place is the only success. Exit 0 without the
/// file and a non-zero exit are reported differently since they usually
/// have different causes.
pub async fn classify(job_id: Uuid, output_path: &Path, output: &ProcessOutput) -> JobResult {
    if !output.success() {
        warn!("Job {} engine exited with {:?}", job_id, output.exit_code);
        let detail = if output.stderr.trim().is_empty() {
            match output.exit_code {
                Some(code) => format!("engine exited with code {}", code),
                None => "engine was terminated by a signal".to_string(),
            }
        } else {
            output.stderr.clone()
        };
        return JobResult::failed(
            job_id,
            format!("Processing error:\n{}", detail),
            output.stderr.clone(),
        );
    }

    match fs::metadata(output_path).await {
        Ok(meta) if meta.is_file() => {
            let size_mb = meta.len() as f64 / 1024.0 / 1024.0;
            let name = output_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            info!("Job {} produced {} ({:.1}MB)", job_id, output_path.display(), size_mb);

            let mut result = JobResult::succeeded(
                job_id,
                output_path.to_path_buf(),
                format!(
                    "Dubbing completed successfully!\nFile: {}\nSize: {:.1}MB",
                    name, size_mb
                ),
            );
            result.diagnostics = output.stdout.clone();
            result
        }
        _ => {
            warn!(
                "Job {} engine succeeded but {} is missing",
                job_id,
                output_path.display()
            );
            JobResult::failed(job_id, OUTPUT_MISSING.to_string(), output.stderr.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFactory;
    use crate::job::{JobState, NoProgress};
    use tokio::sync::mpsc;

    const WRITES_OUTPUT: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output_directory) dir="$2"; shift 2 ;;
    --output_name) name="$2"; shift 2 ;;
    *) shift ;;
  esac
done
head -c 2097152 /dev/zero > "$dir/$name"
echo "wrote $name"
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        runner: JobRunner,
    }

    impl Fixture {
        fn new(script: &str, max_concurrent_jobs: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let script_path = dir.path().join("engine.sh");
            std::fs::write(&script_path, script).unwrap();

            let mut config = Config::default();
            config.engine.program = "sh".to_string();
            config.engine.base_args = vec![script_path.to_string_lossy().to_string()];
            config.engine.poll_interval_ms = 20;
            config.jobs.output_dir = dir.path().join("outputs");
            config.jobs.max_concurrent_jobs = max_concurrent_jobs;
            config.media.ffprobe_path = String::new();

            let engine = EngineFactory::create_engine(config.engine.clone());
            let accelerator = AcceleratorSetup::cpu_only(config.accelerator.clone());
            let runner = JobRunner::new(&config, engine, accelerator).unwrap();
            Self { dir, runner }
        }

        fn input(&self) -> PathBuf {
            let path = self.dir.path().join("clip.mp4");
            std::fs::write(&path, b"video").unwrap();
            path
        }

        fn request(&self) -> JobRequest {
            JobRequest::new(self.input(), "por", "hf_token")
        }
    }

    #[tokio::test]
    async fn test_success_reports_path_and_size() {
        let fx = Fixture::new(WRITES_OUTPUT, 1);

        let result = fx.runner.submit(&fx.request(), &NoProgress).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.state, JobState::Succeeded);
        let path = result.output_path.clone().unwrap();
        assert!(path.starts_with(fx.runner.output_dir()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * 1024 * 1024);
        assert!(result.message.contains("Size: 2.0MB"), "{}", result.message);
        assert!(result.message.contains(&*path.file_name().unwrap().to_string_lossy()));
        assert!(result.diagnostics.contains("wrote dubbed_"));
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_is_failure() {
        let fx = Fixture::new("echo 'nothing to see' >&2\nexit 0\n", 1);

        let result = fx.runner.submit(&fx.request(), &NoProgress).await;

        assert!(!result.success);
        assert_eq!(result.message, OUTPUT_MISSING);
        assert!(result.output_path.is_none());
        assert!(result.diagnostics.contains("nothing to see"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_embeds_stderr() {
        let fx = Fixture::new("echo boom >&2\nexit 1\n", 1);

        let result = fx.runner.submit(&fx.request(), &NoProgress).await;

        assert!(!result.success);
        assert_eq!(result.state, JobState::Failed);
        assert!(result.message.starts_with("Processing error:"));
        assert!(result.message.contains("boom"));
        assert_eq!(result.diagnostics.trim(), "boom");
    }

    #[tokio::test]
    async fn test_invalid_request_never_launches_engine() {
        let fx = Fixture::new("touch \"$0.launched\"\n", 1);
        let mut request = fx.request();
        request.token = String::new();

        let result = fx.runner.submit(&request, &NoProgress).await;

        assert!(!result.success);
        assert_eq!(result.message, "Hugging Face token is required");
        assert!(!fx.dir.path().join("engine.sh.launched").exists());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unexpected_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.engine.program = "/nonexistent/dubbing-engine".to_string();
        config.jobs.output_dir = dir.path().join("outputs");
        config.media.ffprobe_path = String::new();
        let engine = EngineFactory::create_engine(config.engine.clone());
        let runner =
            JobRunner::new(&config, engine, AcceleratorSetup::cpu_only(config.accelerator.clone()))
                .unwrap();

        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let result = runner
            .submit(&JobRequest::new(input, "por", "hf_token"), &NoProgress)
            .await;

        assert!(!result.success);
        assert!(result.message.starts_with("Unexpected error:"), "{}", result.message);
        assert!(result.message.contains("/nonexistent/dubbing-engine"));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("engine.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();
        let mut config = Config::default();
        config.engine.program = "sh".to_string();
        config.engine.base_args = vec![script.to_string_lossy().to_string()];
        config.engine.poll_interval_ms = 20;
        config.engine.timeout_secs = Some(1);
        config.jobs.output_dir = dir.path().join("outputs");
        config.media.ffprobe_path = String::new();
        let engine = EngineFactory::create_engine(config.engine.clone());
        let runner =
            JobRunner::new(&config, engine, AcceleratorSetup::cpu_only(config.accelerator.clone()))
                .unwrap();

        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let result = runner
            .submit(&JobRequest::new(input, "por", "hf_token"), &NoProgress)
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "Processing timed out after 1s");
    }

    #[tokio::test]
    async fn test_same_second_submissions_get_distinct_outputs() {
        let fx = Fixture::new(WRITES_OUTPUT, 2);
        let request = fx.request();

        let (a, b) = tokio::join!(
            fx.runner.submit(&request, &NoProgress),
            fx.runner.submit(&request, &NoProgress)
        );

        assert!(a.success && b.success);
        assert_ne!(a.job_id, b.job_id);
        assert_ne!(a.output_path, b.output_path);
    }

    #[tokio::test]
    async fn test_second_job_waits_for_slot() {
        let fx = Fixture::new(&format!("sleep 1\n{}", WRITES_OUTPUT), 1);
        let request = fx.request();
        let (tx, mut rx) = mpsc::unbounded_channel::<(Uuid, Progress)>();

        let (a, b) = tokio::join!(
            fx.runner.submit(&request, &tx),
            fx.runner.submit(&request, &tx)
        );
        assert!(a.success && b.success);

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        let queued: Vec<_> = updates
            .iter()
            .filter(|(_, p)| *p == Progress::Queued)
            .collect();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let fx = Fixture::new(WRITES_OUTPUT, 1);
        let (tx, mut rx) = mpsc::unbounded_channel::<(Uuid, Progress)>();

        let result = fx.runner.submit(&fx.request(), &tx).await;

        let mut updates = Vec::new();
        while let Ok((id, update)) = rx.try_recv() {
            assert_eq!(id, result.job_id);
            updates.push(update);
        }
        assert_eq!(updates.first(), Some(&Progress::Validating));
        assert_eq!(updates[1], Progress::Started { device: Device::Cpu });
        assert!(updates.contains(&Progress::Finalizing));
        assert_eq!(updates.last(), Some(&Progress::Done { success: true }));
    }
}
