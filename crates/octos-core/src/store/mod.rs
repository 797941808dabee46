//! File-backed stores for run state.

pub mod artifact_store;
pub mod checkpoint_store;

pub use artifact_store::{artifact_key, ArtifactStore};
pub use checkpoint_store::{CheckpointRecord, CheckpointStore};
