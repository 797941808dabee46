//! CheckpointStore: one JSON record per pipeline file for resumable runs.
//!
//! Storage path: `<state_root>/state/<pipeline file name>.json`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::PipelineError;

/// Progress of a run, rewritten after every successful step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Pipeline file the run belongs to
    pub pipeline_file: String,
    /// Index of the last step that completed successfully
    pub last_completed_step: usize,
    /// Outputs of every step executed so far, in execution order
    pub outputs: IndexMap<String, String>,
    /// Artifacts loaded so far, keyed like `{{artifact.<key>}}`
    #[serde(default)]
    pub artifacts: IndexMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl CheckpointRecord {
    pub fn new(
        pipeline_file: impl Into<String>,
        last_completed_step: usize,
        outputs: IndexMap<String, String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_file: pipeline_file.into(),
            last_completed_step,
            outputs,
            artifacts: IndexMap::new(),
            start_time,
            last_update: start_time,
        }
    }

    pub fn with_artifacts(mut self, artifacts: IndexMap<String, String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    /// Directory holding checkpoint files (e.g., "/project/.octos/state")
    base_dir: PathBuf,
}

impl CheckpointStore {
    /// Checkpoints are stored in `<state_root>/state/`.
    pub fn new(state_root: impl AsRef<Path>) -> Self {
        Self {
            base_dir: state_root.as_ref().join("state"),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Checkpoint path for a pipeline, derived from its file name only.
    pub fn path_for(&self, pipeline_file: impl AsRef<Path>) -> PathBuf {
        let name = pipeline_file
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "pipeline".to_string());
        self.base_dir.join(format!("{}.json", name))
    }

    /// Write the record, replacing any previous one. `last_update` is
    /// refreshed on every save.
    pub async fn save(&self, record: &mut CheckpointRecord) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            PipelineError::CheckpointIo(format!(
                "Failed to create state dir '{}': {}",
                self.base_dir.display(),
                e
            ))
        })?;

        record.last_update = Utc::now();
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| PipelineError::CheckpointIo(format!("Failed to serialize checkpoint: {}", e)))?;

        // Write then rename so a crash never leaves a truncated record behind.
        let path = self.path_for(&record.pipeline_file);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.map_err(|e| {
            PipelineError::CheckpointIo(format!("Failed to write '{}': {}", tmp_path.display(), e))
        })?;
        fs::rename(&tmp_path, &path).await.map_err(|e| {
            PipelineError::CheckpointIo(format!("Failed to replace '{}': {}", path.display(), e))
        })?;

        tracing::debug!(
            "[CheckpointStore] Saved step {} for {}",
            record.last_completed_step,
            record.pipeline_file
        );
        Ok(())
    }

    pub async fn exists(&self, pipeline_file: impl AsRef<Path>) -> bool {
        fs::try_exists(self.path_for(pipeline_file))
            .await
            .unwrap_or(false)
    }

    /// Read the record for a pipeline. `Ok(None)` means there is none.
    pub async fn load(
        &self,
        pipeline_file: impl AsRef<Path>,
    ) -> Result<Option<CheckpointRecord>, PipelineError> {
        let path = self.path_for(pipeline_file);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::CheckpointIo(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let record = serde_json::from_str(&content).map_err(|e| {
            PipelineError::CheckpointIo(format!("Failed to parse '{}': {}", path.display(), e))
        })?;
        Ok(Some(record))
    }

    /// Delete the record. Missing records are fine.
    pub async fn clear(&self, pipeline_file: impl AsRef<Path>) -> Result<(), PipelineError> {
        let path = self.path_for(pipeline_file);
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("[CheckpointStore] Cleared {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::CheckpointIo(format!(
                "Failed to remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: usize) -> CheckpointRecord {
        let mut outputs = IndexMap::new();
        outputs.insert("analyze".to_string(), "two issues".to_string());
        outputs.insert("plan".to_string(), "fix both".to_string());
        CheckpointRecord::new("pipelines/review.yaml", step, outputs, Utc::now())
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        assert!(!store.exists("review.yaml").await);
        assert!(store.load("review.yaml").await.unwrap().is_none());

        let mut rec = record(1);
        store.save(&mut rec).await.unwrap();
        assert!(store.exists("review.yaml").await);
        assert!(dir.path().join("state").join("review.yaml.json").exists());

        let loaded = store.load("other/dir/review.yaml").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        let names: Vec<&String> = loaded.outputs.keys().collect();
        assert_eq!(names, vec!["analyze", "plan"]);

        store.clear("review.yaml").await.unwrap();
        assert!(!store.exists("review.yaml").await);
        // Clearing again is a no-op.
        store.clear("review.yaml").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_overwrites_and_touches_last_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut rec = record(0);
        store.save(&mut rec).await.unwrap();
        let first_update = rec.last_update;

        rec.last_completed_step = 1;
        store.save(&mut rec).await.unwrap();
        assert!(rec.last_update >= first_update);

        let loaded = store.load("review.yaml").await.unwrap().unwrap();
        assert_eq!(loaded.last_completed_step, 1);
        assert_eq!(loaded.start_time, rec.start_time);
    }

    #[tokio::test]
    async fn test_artifacts_are_saved_and_optional_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut artifacts = IndexMap::new();
        artifacts.insert("analysis".to_string(), "three issues".to_string());
        let mut rec = record(0).with_artifacts(artifacts);
        store.save(&mut rec).await.unwrap();
        let loaded = store.load("review.yaml").await.unwrap().unwrap();
        assert_eq!(loaded.artifacts["analysis"], "three issues");

        // Records written without the field still load.
        std::fs::write(
            store.path_for("old.yaml"),
            r#"{
  "pipeline_file": "old.yaml",
  "last_completed_step": 0,
  "outputs": {"analyze": "done"},
  "start_time": "2026-01-01T00:00:00Z",
  "last_update": "2026-01-01T00:00:00Z"
}"#,
        )
        .unwrap();
        let old = store.load("old.yaml").await.unwrap().unwrap();
        assert!(old.artifacts.is_empty());
        assert_eq!(old.outputs["analyze"], "done");
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        std::fs::create_dir_all(store.base_dir()).unwrap();
        std::fs::write(store.path_for("review.yaml"), "{not json").unwrap();

        let err = store.load("review.yaml").await.unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointIo(_)));
    }

    #[tokio::test]
    async fn test_unwritable_state_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the state directory should be.
        let blocker = dir.path().join("state");
        std::fs::write(&blocker, "").unwrap();
        let store = CheckpointStore::new(dir.path());

        let err = store.save(&mut record(0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointIo(_)));
    }
}
