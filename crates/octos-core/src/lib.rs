//! Octos Core: engine for declarative multi-step agent pipelines.
//!
//! A pipeline is an ordered list of steps. Each step sends a composed
//! prompt to an external agent command and keeps what it prints for later
//! steps. This crate holds everything except presentation:
//!
//! - `pipeline`: schema, conditions, context/interpolation, executor, events
//! - `runner`: agent subprocess execution (buffered or streaming)
//! - `sanitize`: terminal escape cleanup for captured output
//! - `store`: checkpoints and artifacts under `<workspace>/.octos/`
//! - `trace`: workspace snapshots for file-change reporting

pub mod config;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod sanitize;
pub mod store;
pub mod trace;

// Convenience re-exports
pub use config::{ExecutorConfig, OutputMode};
pub use error::{AgentError, PipelineError};
pub use pipeline::{PipelineDefinition, PipelineEvent, PipelineExecutor, RunSummary};
