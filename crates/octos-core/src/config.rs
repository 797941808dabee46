//! Run-time settings for the executor.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (under the workspace root) holding checkpoints and artifacts.
pub const STATE_DIR_NAME: &str = ".octos";

/// Deadline applied to an agent invocation without its own `timeout_secs`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// How agent output is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Wait for exit and capture everything at once
    #[default]
    Buffered,
    /// Forward each line as a `StepOutputLine` event while the agent runs
    Streaming,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Agent working directory and file-change scan root
    pub workspace_root: PathBuf,
    /// Where checkpoints (`state/`) and artifacts (`artifacts/`) live
    pub state_root: PathBuf,
    pub default_timeout: Duration,
    pub output_mode: OutputMode,
    /// Snapshot the workspace around each step and emit `FilesChanged`
    pub track_file_changes: bool,
}

impl ExecutorConfig {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        let workspace_root = workspace_root.as_ref().to_path_buf();
        Self {
            state_root: workspace_root.join(STATE_DIR_NAME),
            workspace_root,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_mode: OutputMode::default(),
            track_file_changes: true,
        }
    }

    pub fn with_state_root(mut self, state_root: impl AsRef<Path>) -> Self {
        self.state_root = state_root.as_ref().to_path_buf();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_file_tracking(mut self, enabled: bool) -> Self {
        self.track_file_changes = enabled;
        self
    }
}
