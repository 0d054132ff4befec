use serde::Serialize;

use crate::accelerator::{AcceleratorSetup, AcceleratorStatus};

/// Host summary shown next to the form
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub accelerator: AcceleratorStatus,
    pub version: &'static str,
    pub engine: String,
}

impl SystemInfo {
    pub fn collect(accelerator: &AcceleratorSetup, engine: String) -> Self {
        Self {
            accelerator: accelerator.status().clone(),
            version: env!("CARGO_PKG_VERSION"),
            engine,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.accelerator {
            AcceleratorStatus::Available(info) => {
                lines.push(format!("GPU: {}", info.name));
                lines.push(format!("VRAM: {:.1} GB", info.memory_gib()));
                lines.push(format!("Driver: {}", info.driver_version));
            }
            AcceleratorStatus::Unavailable { .. } => lines.push("GPU: not available".to_string()),
        }
        lines.push(format!("dubweb: {}", self.version));
        lines.push(format!("Engine: {}", self.engine));
        lines
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}
