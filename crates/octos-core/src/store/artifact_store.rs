//! ArtifactStore: named text files that outlive a run.
//!
//! Storage path: `<state_root>/artifacts/<name>`. Saving the same name
//! again overwrites the file.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::PipelineError;
use crate::pipeline::schema::is_plain_file_name;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    /// Artifacts are stored in `<state_root>/artifacts/`.
    pub fn new(state_root: impl AsRef<Path>) -> Self {
        Self {
            base_dir: state_root.as_ref().join("artifacts"),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub async fn save(&self, name: &str, content: &str) -> Result<(), PipelineError> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            PipelineError::ArtifactIo(format!(
                "Failed to create artifacts dir '{}': {}",
                self.base_dir.display(),
                e
            ))
        })?;
        fs::write(&path, content).await.map_err(|e| {
            PipelineError::ArtifactIo(format!("Failed to write '{}': {}", path.display(), e))
        })?;
        tracing::info!("[ArtifactStore] Saved artifact {}", name);
        Ok(())
    }

    pub async fn load(&self, name: &str) -> Result<String, PipelineError> {
        let path = self.path_for(name)?;
        fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::ArtifactIo(format!("Failed to read '{}': {}", path.display(), e))
        })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, PipelineError> {
        if !is_plain_file_name(name) {
            return Err(PipelineError::ArtifactIo(format!(
                "Invalid artifact name '{}'",
                name
            )));
        }
        Ok(self.base_dir.join(name))
    }
}

/// Placeholder key for a loaded artifact: the file name without its
/// extension (`analysis.md` → `analysis`).
pub fn artifact_key(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
