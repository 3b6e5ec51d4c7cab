//! Execution sandbox - mount a tree snapshot and run it.
//!
//! A run moves through `Idle -> Installing -> Running -> Stopped | Failed`
//! (`Idle -> Running` when there is no `package.json`). Output arrives as a
//! stream of [`RunEvent`]s with terminal control sequences removed.

mod controller;
mod manifest;
mod mount;
mod output;
mod process;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use controller::{RunHandle, SandboxController};
pub use manifest::{plan_run, RunPlan, ENTRY_CANDIDATES, MANIFEST};
pub use mount::Mount;
pub use output::{detect_server_ready, strip_control_sequences, OutputBuffer};

/// Lifecycle of one sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Installing,
    Running,
    Stopped,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Installing => "installing",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Status(RunStatus),
    /// A chunk of process output
    Output(String),
    /// A message from the controller itself
    Notice(String),
    /// The program announced a listening server
    ServerReady { host: String, port: u16 },
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no runnable file found in the workspace")]
    NoRunnableFile,
    #[error("dependency installation failed: {0}")]
    InstallationFailed(String),
    #[error("path {0:?} escapes the sandbox root")]
    PathEscape(String),
    #[error("path {path:?} lies beneath file {file:?}")]
    PathConflict { path: String, file: String },
    #[error("failed to mount workspace: {0}")]
    Mount(#[from] std::io::Error),
    #[error("process error: {0}")]
    Process(std::io::Error),
    #[error("command is empty")]
    EmptyCommand,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
