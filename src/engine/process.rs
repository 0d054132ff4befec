use async_trait::async_trait;
use std::future;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::job::{HeartbeatRamp, Progress, ProgressSink};
use super::{DubbingEngine, EngineCommand, EngineCommandBuilder, EngineError, EngineInvocation, ProcessOutput};

/// Cap on captured stdout or stderr per stream (10 MiB). Anything past it is read and discarded.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long the output pipes may stay open once the engine has exited
const DRAIN_GRACE: Duration = Duration::from_secs(5);

type Captured = Arc<Mutex<Vec<u8>>>;

/// Engine that runs the dubbing tool as a child process
pub struct ProcessEngine {
    config: EngineConfig,
    command_builder: EngineCommandBuilder,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        let command_builder = EngineCommandBuilder::new(&config.program, config.base_args.clone());

        Self {
            config,
            command_builder,
        }
    }

    fn ramp(&self) -> HeartbeatRamp {
        HeartbeatRamp::new(
            self.config.heartbeat_start,
            self.config.heartbeat_end,
            self.config.heartbeat_step,
        )
    }

    /// Spawn `command`, emit heartbeats until it exits, then collect its output.
    ///
    /// With a timeout configured the child is killed once it expires.
    async fn run_with_heartbeat(
        &self,
        job_id: Uuid,
        command: &EngineCommand,
        env: &[(String, String)],
        progress: &dyn ProgressSink,
    ) -> Result<ProcessOutput, EngineError> {
        info!("Launching {} for job {}: {}", command.description, job_id, command.redacted());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so workers the engine starts can be signalled with it
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| EngineError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;
        let pid = child.id();

        // Drain both pipes concurrently so a chatty engine never blocks on a full pipe
        let stdout_buf = Captured::default();
        let stderr_buf = Captured::default();
        let stdout_task = tokio::spawn(read_stream(child.stdout.take(), stdout_buf.clone()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take(), stderr_buf.clone()));

        let ramp = self.ramp();
        let timeout = self.config.timeout();
        let deadline = timeout.map(|t| start + t);
        let mut ticker = time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u32 = 0;

        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = ticker.tick() => {
                    progress.report(job_id, &Progress::Heartbeat {
                        tick,
                        elapsed_secs: start.elapsed().as_secs(),
                        nominal_percent: ramp.percent_for(tick),
                    });
                    tick = tick.saturating_add(1);
                }
                _ = wait_until(deadline) => {
                    let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                    warn!("Job {} exceeded {}s, killing engine process group", job_id, secs);
                    kill_process_group(pid);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill engine process for job {}: {}", job_id, e);
                    }
                    return Err(EngineError::TimedOut { secs });
                }
            }
        };

        // Helpers left behind by the engine would keep the pipes open and hold the device
        kill_process_group(pid);
        let drain_deadline = Instant::now() + DRAIN_GRACE;
        finish_drain(job_id, "stdout", stdout_task, drain_deadline).await;
        finish_drain(job_id, "stderr", stderr_task, drain_deadline).await;

        let output = ProcessOutput {
            exit_code: status.code(),
            stdout: take_captured(&stdout_buf),
            stderr: take_captured(&stderr_buf),
            duration: start.elapsed(),
        };

        debug!(
            "Engine for job {} exited with {:?} after {:.1}s ({} heartbeats)",
            job_id,
            output.exit_code,
            output.duration.as_secs_f64(),
            tick
        );
        Ok(output)
    }
}

#[async_trait]
impl DubbingEngine for ProcessEngine {
    async fn run(
        &self,
        job_id: Uuid,
        invocation: &EngineInvocation,
        env: &[(String, String)],
        progress: &dyn ProgressSink,
    ) -> Result<ProcessOutput, EngineError> {
        let command = self.command_builder.dub(invocation);
        self.run_with_heartbeat(job_id, &command, env, progress).await
    }

    async fn check_availability(&self) -> Result<(), EngineError> {
        let command = self.command_builder.help();
        debug!("Executing engine command: {}", command.redacted());

        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                program: command.program.clone(),
                source: e,
            })?;

        if output.status.success() {
            info!("Dubbing engine is available: {}", self.describe());
            Ok(())
        } else {
            Err(EngineError::CheckFailed {
                description: command.description,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    fn describe(&self) -> String {
        self.config.display_command()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}

/// Read a stream to EOF, keeping the first [`MAX_OUTPUT_BYTES`] in `captured`
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, captured: Captured) {
    let Some(mut reader) = handle else {
        return;
    };

    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut buf = captured.lock().unwrap_or_else(|e| e.into_inner());
                let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Engine output stream closed with error: {}", e);
                break;
            }
        }
    }
}

/// Wait for a reader task until `deadline`, then give up on the rest of its stream
async fn finish_drain(job_id: Uuid, stream: &str, mut task: JoinHandle<()>, deadline: Instant) {
    if time::timeout_at(deadline, &mut task).await.is_err() {
        warn!(
            "Job {}: engine {} still open {}s after exit, keeping what was read",
            job_id,
            stream,
            DRAIN_GRACE.as_secs()
        );
        task.abort();
    }
}

fn take_captured(captured: &Captured) -> String {
    let buf = captured.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGKILL every process left in the engine's group
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; an empty group yields ESRCH.
    let ret = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if ret != 0 {
        debug!(
            "No processes left in engine group {}: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::job::{Device, NoProgress, TtsEngine};
    use std::path::{Path, PathBuf};
    use tokio::sync::mpsc;

    fn engine_for_script(script: &Path, timeout_secs: Option<u64>) -> ProcessEngine {
        let mut config = Config::default().engine;
        config.program = "sh".to_string();
        config.base_args = vec![script.to_string_lossy().to_string()];
        config.poll_interval_ms = 20;
        config.timeout_secs = timeout_secs;
        ProcessEngine::new(config)
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("engine.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn invocation(dir: &Path) -> EngineInvocation {
        EngineInvocation {
            input_file: dir.join("in.mp4"),
            target_language: "por".to_string(),
            source_language: None,
            token: "hf_secret".to_string(),
            output_dir: dir.to_path_buf(),
            output_name: "dubbed_test.mp4".to_string(),
            tts_engine: TtsEngine::Edge,
            device: Device::Cpu,
        }
    }

    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo out\necho err >&2\nexit 3\n");
        let engine = engine_for_script(&script, None);

        let output = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_environment_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "printf '%s' \"$CUDA_VISIBLE_DEVICES\"\n");
        let engine = engine_for_script(&script, None);
        let env = vec![("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string())];

        let output = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &env, &NoProgress)
            .await
            .unwrap();

        assert_eq!(output.stdout, "1");
    }

    #[tokio::test]
    async fn test_heartbeats_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 1\n");
        let engine = engine_for_script(&script, None);
        let (tx, mut rx) = mpsc::unbounded_channel::<(Uuid, Progress)>();

        let output = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &tx)
            .await
            .unwrap();
        assert!(output.success());

        let mut beats = Vec::new();
        while let Ok((_, update)) = rx.try_recv() {
            beats.push(update);
        }
        assert!(beats.len() >= 3, "expected several heartbeats, got {}", beats.len());
        assert!(beats.iter().all(|b| b.is_indeterminate()));
        assert_eq!(beats[0].nominal_percent(), 30);
        assert_eq!(beats[1].nominal_percent(), 35);
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 30\n");
        let engine = engine_for_script(&script, Some(1));

        let started = std::time::Instant::now();
        let result = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await;

        assert!(matches!(result, Err(EngineError::TimedOut { secs: 1 })));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    /// Whether `pid` is a live (non-zombie) process
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_for_exit(pid: &str) -> bool {
        for _ in 0..100 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_engine_workers() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let script = write_script(
            dir.path(),
            &format!("sleep 30 &\necho $! > '{}'\nwait\n", pid_file.display()),
        );
        let engine = engine_for_script(&script, Some(1));

        let result = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await;
        assert!(matches!(result, Err(EngineError::TimedOut { secs: 1 })));

        let worker = std::fs::read_to_string(&pid_file).unwrap();
        assert!(wait_for_exit(worker.trim()).await, "worker {} survived", worker.trim());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_leftover_worker_does_not_hold_completion() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let script = write_script(
            dir.path(),
            &format!("sleep 30 &\necho $! > '{}'\necho done\nexit 0\n", pid_file.display()),
        );
        let engine = engine_for_script(&script, None);

        let started = std::time::Instant::now();
        let output = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "done");
        assert!(started.elapsed() < DRAIN_GRACE + Duration::from_secs(2));
        let worker = std::fs::read_to_string(&pid_file).unwrap();
        assert!(wait_for_exit(worker.trim()).await, "worker {} survived", worker.trim());
    }

    #[tokio::test]
    async fn test_output_past_cap_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "head -c 12582912 /dev/zero >&2 || { echo write-failed; exit 9; }\necho finished\nexit 0\n",
        );
        let engine = engine_for_script(&script, None);

        let output = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.trim(), "finished");
        assert_eq!(output.stderr.len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let mut config = Config::default().engine;
        config.program = "/nonexistent/dubbing-engine".to_string();
        let engine = ProcessEngine::new(config);
        let dir = tempfile::tempdir().unwrap();

        let result = engine
            .run(Uuid::new_v4(), &invocation(dir.path()), &[], &NoProgress)
            .await;
        assert!(matches!(result, Err(EngineError::Spawn { .. })));

        let check = engine.check_availability().await;
        assert!(matches!(check, Err(EngineError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_check_availability_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'No module named open_dubbing' >&2\nexit 1\n");
        let engine = engine_for_script(&script, None);

        match engine.check_availability().await {
            Err(EngineError::CheckFailed { stderr, .. }) => {
                assert!(stderr.contains("No module named open_dubbing"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
