//! Progress events emitted by the executor.
//!
//! Events travel over a single unbounded channel to one consumer, so a
//! presentation layer sees them in the order they were produced even though
//! streamed lines come from two concurrent pipe readers. Consumers must not
//! call back into the executor.

use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A step passed its condition; `prompt` is the interpolated task text.
    StepStarted { index: usize, prompt: String },
    /// One sanitized line of agent output (streaming mode only).
    StepOutputLine { index: usize, line: String },
    /// Final captured output of a successful step.
    StepOutput { index: usize, output: String },
    /// A step finished; `error` is set when the agent failed.
    StepCompleted {
        index: usize,
        duration: Duration,
        error: Option<String>,
    },
    /// Files the step added (`+`), modified (`M`) or deleted (`-`).
    FilesChanged { index: usize, changes: Vec<String> },
}

impl PipelineEvent {
    pub fn index(&self) -> usize {
        match self {
            PipelineEvent::StepStarted { index, .. }
            | PipelineEvent::StepOutputLine { index, .. }
            | PipelineEvent::StepOutput { index, .. }
            | PipelineEvent::StepCompleted { index, .. }
            | PipelineEvent::FilesChanged { index, .. } => *index,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
