//! CLI command implementations.
//!
//! Each submodule backs one or more top-level commands and goes through
//! octos-core for all pipeline logic.

pub mod pipeline;
pub mod progress;
pub mod state;

use std::path::{Path, PathBuf};

use octos_core::config::STATE_DIR_NAME;

/// Workspace and state locations resolved from the global flags.
#[derive(Debug, Clone)]
pub struct Paths {
    pub workspace: PathBuf,
    pub state_root: PathBuf,
}

impl Paths {
    pub fn new(workspace: &Path, state_dir: Option<&Path>) -> Self {
        let workspace =
            std::fs::canonicalize(workspace).unwrap_or_else(|_| workspace.to_path_buf());
        let state_root = state_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| workspace.join(STATE_DIR_NAME));
        Self {
            workspace,
            state_root,
        }
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
