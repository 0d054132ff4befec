use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::Device;

/// Update emitted while a job moves through its lifecycle.
///
/// The engine exposes no progress protocol, so nothing here is measured.
/// `Heartbeat` only says the engine process is still alive; its
/// `nominal_percent` is a fixed ramp for display and must not be read as
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    Validating,
    Queued,
    Started { device: Device },
    Heartbeat {
        tick: u32,
        elapsed_secs: u64,
        nominal_percent: u8,
    },
    Finalizing,
    Done { success: bool },
}

impl Progress {
    /// Display position on a 0-100 bar. Never a measurement.
    pub fn nominal_percent(&self) -> u8 {
        match self {
            Progress::Validating => 10,
            Progress::Queued => 20,
            Progress::Started { .. } => 30,
            Progress::Heartbeat { nominal_percent, .. } => *nominal_percent,
            Progress::Finalizing => 95,
            Progress::Done { .. } => 100,
        }
    }

    /// Whether the UI should render an indeterminate indicator
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Progress::Started { .. } | Progress::Heartbeat { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Progress::Validating => "Validating files...".to_string(),
            Progress::Queued => "Waiting for a free engine slot...".to_string(),
            Progress::Started { device } => format!("Starting dubbing on {}...", device),
            Progress::Heartbeat { elapsed_secs, .. } => {
                format!("Processing... ({}s elapsed)", elapsed_secs)
            }
            Progress::Finalizing => "Finalizing...".to_string(),
            Progress::Done { success: true } => "Done!".to_string(),
            Progress::Done { success: false } => "Failed".to_string(),
        }
    }
}

/// Fixed ramp of nominal percentages used by heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRamp {
    pub start: u8,
    pub end: u8,
    pub step: u8,
}

impl HeartbeatRamp {
    pub fn new(start: u8, end: u8, step: u8) -> Self {
        Self {
            start: start.min(end),
            end,
            step: step.max(1),
        }
    }

    /// Nominal percent of the `tick`-th heartbeat, held at `end` once reached
    pub fn percent_for(&self, tick: u32) -> u8 {
        let value = self.start as u32 + tick.saturating_mul(self.step as u32);
        value.min(self.end as u32) as u8
    }
}

impl Default for HeartbeatRamp {
    fn default() -> Self {
        Self::new(30, 90, 5)
    }
}

/// Receiver of job progress updates
pub trait ProgressSink: Send + Sync {
    fn report(&self, job_id: Uuid, progress: &Progress);
}

/// Discards every update
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _job_id: Uuid, _progress: &Progress) {}
}

impl ProgressSink for UnboundedSender<(Uuid, Progress)> {
    fn report(&self, job_id: Uuid, progress: &Progress) {
        // A dropped receiver only means nobody is watching anymore
        let _ = self.send((job_id, progress.clone()));
    }
}
