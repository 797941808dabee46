//! Change tracking: which files an agent step added, modified or deleted.
//!
//! The executor captures a `FileSnapshot` of the workspace before each
//! invocation and diffs it against a second snapshot afterwards.

mod file_changes;

pub use file_changes::{ChangeKind, FileChange, FileSnapshot};
