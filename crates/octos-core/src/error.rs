//! Core error types for the octos engine.
//!
//! `PipelineError` is what `PipelineExecutor::run` and the stores return.
//! `AgentError` describes why a single agent invocation failed and is
//! wrapped by `PipelineError::StepFailed`.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid pipeline definition. Raised before any process is spawned.
    #[error("Invalid pipeline: {0}")]
    Config(String),

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: AgentError,
    },

    #[error("Artifact error: {0}")]
    ArtifactIo(String),

    #[error("Checkpoint error: {0}")]
    CheckpointIo(String),

    #[error(
        "Checkpoint is stale: it records step {} as completed but the pipeline only has {step_count} step(s). \
         Run `octos clean` to discard it.",
        last_completed + 1
    )]
    StaleCheckpoint {
        last_completed: usize,
        step_count: usize,
    },
}

impl PipelineError {
    /// True when the run was stopped by the cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::StepFailed {
                source: AgentError::Cancelled,
                ..
            }
        )
    }
}

/// Failure of one agent subprocess.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to spawn '{command}': {message}. Is it installed and in PATH?")]
    Spawn { command: String, message: String },

    #[error("Agent exited with {status}: {output}")]
    NonZeroExit { status: String, output: String },

    #[error("Agent timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Agent was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}
