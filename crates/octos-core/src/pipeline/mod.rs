//! Pipeline engine: YAML-defined, sequential agent steps.
//!
//! # Architecture
//!
//! ```text
//! pipeline.yaml ──► PipelineDefinition ──► PipelineExecutor ──► PipelineEvent channel
//!                                              │
//!                          Condition ◄─────────┤
//!                   ExecutionContext ◄─────────┤  interpolate + compose prompt
//!                        AgentRunner ◄─────────┤  sh / claude / codex ...
//!          ArtifactStore, CheckpointStore ◄────┘  <workspace>/.octos/
//! ```

pub mod condition;
pub mod context;
pub mod events;
pub mod executor;
pub mod schema;

pub use condition::{should_run, Condition};
pub use context::ExecutionContext;
pub use events::{event_channel, EventReceiver, EventSender, PipelineEvent};
pub use executor::{PipelineExecutor, RunSummary};
pub use schema::{AgentInvocation, ContextValue, PipelineDefinition, ScalarValue, Step};
