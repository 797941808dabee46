//! Pipeline Executor: runs a pipeline definition step by step.
//!
//! For each step, in order:
//! 1. Evaluate the `when` condition; skipped steps emit no events
//! 2. Load the `load_from` artifact (failure only logs a warning)
//! 3. Interpolate the template and compose the full prompt
//! 4. Run the agent, buffered or streaming, diffing the workspace around it
//! 5. Record the output, save the `save_to` artifact, write a checkpoint
//!
//! The first agent failure stops the run; the checkpoint of the last
//! successful step stays on disk so the run can be resumed. A run that
//! reaches the end deletes its checkpoint.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::{ExecutorConfig, OutputMode};
use crate::error::{AgentError, PipelineError};
use crate::pipeline::condition::should_run;
use crate::pipeline::context::ExecutionContext;
use crate::pipeline::events::{EventSender, PipelineEvent};
use crate::pipeline::schema::{PipelineDefinition, Step};
use crate::runner::{AgentRunner, LineCallback};
use crate::store::{artifact_key, ArtifactStore, CheckpointRecord, CheckpointStore};
use crate::trace::FileSnapshot;

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Index of the first step considered when resuming from a checkpoint
    pub resumed_from: Option<usize>,
    /// Names of the steps whose agent ran, in order
    pub executed: Vec<String>,
    /// Names of the steps whose condition was false
    pub skipped: Vec<String>,
}

/// The pipeline execution engine.
pub struct PipelineExecutor {
    config: ExecutorConfig,
    runner: AgentRunner,
    checkpoints: CheckpointStore,
    artifacts: ArtifactStore,
}

impl PipelineExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            runner: AgentRunner::new(&config.workspace_root, config.default_timeout),
            checkpoints: CheckpointStore::new(&config.state_root),
            artifacts: ArtifactStore::new(&config.state_root),
            config,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Execute a pipeline.
    ///
    /// With `resume`, execution starts after the last completed step of an
    /// existing checkpoint and its outputs are restored. Progress is reported
    /// on `events` when given.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        resume: bool,
        events: Option<EventSender>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        definition.validate()?;

        let pipeline_file = definition.file.to_string_lossy().to_string();
        let mut ctx = ExecutionContext::new(definition.context.clone());
        let mut start_index = 0;
        let mut start_time = Utc::now();
        let mut summary = RunSummary::default();

        if resume {
            match self.checkpoints.load(&definition.file).await? {
                Some(record) => {
                    if record.last_completed_step >= definition.steps.len() {
                        return Err(PipelineError::StaleCheckpoint {
                            last_completed: record.last_completed_step,
                            step_count: definition.steps.len(),
                        });
                    }
                    if record.pipeline_file != pipeline_file {
                        tracing::warn!(
                            "[PipelineExecutor] Checkpoint was written for '{}', resuming '{}'",
                            record.pipeline_file,
                            pipeline_file
                        );
                    }
                    start_index = record.last_completed_step + 1;
                    start_time = record.start_time;
                    ctx = ctx
                        .with_outputs(record.outputs)
                        .with_artifacts(record.artifacts);
                    summary.resumed_from = Some(start_index);
                    tracing::info!(
                        "[PipelineExecutor] Resuming {} from step {}/{}",
                        definition.file_name(),
                        start_index + 1,
                        definition.steps.len()
                    );
                }
                None => {
                    tracing::info!(
                        "[PipelineExecutor] No checkpoint for {}, starting from the first step",
                        definition.file_name()
                    );
                }
            }
        }

        for (index, step) in definition.steps.iter().enumerate().skip(start_index) {
            if cancel.is_cancelled() {
                return Err(PipelineError::StepFailed {
                    step: step.name.clone(),
                    source: AgentError::Cancelled,
                });
            }

            if !should_run(step.when.as_deref(), &ctx) {
                tracing::info!(
                    "[PipelineExecutor] Skipping step {} ({}): condition not met",
                    index + 1,
                    step.name
                );
                summary.skipped.push(step.name.clone());
                continue;
            }

            self.execute_step(definition, index, step, &mut ctx, &events, cancel)
                .await?;

            let mut record = CheckpointRecord::new(
                pipeline_file.clone(),
                index,
                ctx.outputs().clone(),
                start_time,
            )
            .with_artifacts(ctx.artifacts().clone());
            self.checkpoints.save(&mut record).await?;

            summary.executed.push(step.name.clone());
        }

        self.checkpoints.clear(&definition.file).await?;
        tracing::info!(
            "[PipelineExecutor] {} completed: {} executed, {} skipped",
            definition.file_name(),
            summary.executed.len(),
            summary.skipped.len()
        );

        Ok(summary)
    }

    /// Run one step's agent, record its output and save its artifact.
    /// Emits `StepStarted`, streamed lines, `FilesChanged`, `StepOutput` and
    /// `StepCompleted`.
    async fn execute_step(
        &self,
        definition: &PipelineDefinition,
        index: usize,
        step: &Step,
        ctx: &mut ExecutionContext,
        events: &Option<EventSender>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if let Some(ref name) = step.load_from {
            match self.artifacts.load(name).await {
                Ok(content) => ctx.insert_artifact(artifact_key(name), content),
                Err(e) => {
                    tracing::warn!("[PipelineExecutor] Could not load artifact {}: {}", name, e);
                }
            }
        }

        let task = ctx.interpolate(&step.prompt);
        let prompt = ctx.compose_prompt(&task);

        emit(events, PipelineEvent::StepStarted { index, prompt: task });
        tracing::info!(
            "[PipelineExecutor] Running step {}/{} ({})",
            index + 1,
            definition.steps.len(),
            step.name
        );

        let before = self.snapshot().await;
        let agent = definition.agent_for(step);
        let started = Instant::now();

        let result = match self.config.output_mode {
            OutputMode::Buffered => self.runner.run_buffered(agent, &prompt, cancel).await,
            OutputMode::Streaming => {
                let line_events = events.clone();
                let on_line: LineCallback = Arc::new(move |line: String| {
                    emit(&line_events, PipelineEvent::StepOutputLine { index, line });
                });
                self.runner.run_streaming(agent, &prompt, cancel, on_line).await
            }
        };
        let duration = started.elapsed();

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(
                    "[PipelineExecutor] Step {} ({}) failed after {:.1}s: {}",
                    index + 1,
                    step.name,
                    duration.as_secs_f64(),
                    e
                );
                emit(
                    events,
                    PipelineEvent::StepCompleted {
                        index,
                        duration,
                        error: Some(e.to_string()),
                    },
                );
                return Err(PipelineError::StepFailed {
                    step: step.name.clone(),
                    source: e,
                });
            }
        };

        ctx.record_output(&step.name, output.clone());

        if let Some(before) = before {
            if let Some(after) = self.snapshot().await {
                let changes: Vec<String> = before.diff(&after).iter().map(|c| c.to_string()).collect();
                if !changes.is_empty() {
                    emit(events, PipelineEvent::FilesChanged { index, changes });
                }
            }
        }

        if let Some(ref name) = step.save_to {
            if let Err(e) = self.artifacts.save(name, &output).await {
                tracing::warn!("[PipelineExecutor] Could not save artifact {}: {}", name, e);
            }
        }

        emit(events, PipelineEvent::StepOutput { index, output });
        emit(
            events,
            PipelineEvent::StepCompleted {
                index,
                duration,
                error: None,
            },
        );

        Ok(())
    }

    async fn snapshot(&self) -> Option<FileSnapshot> {
        if !self.config.track_file_changes {
            return None;
        }
        let root = self.config.workspace_root.clone();
        let excludes = vec![self.config.state_root.clone()];
        match tokio::task::spawn_blocking(move || FileSnapshot::capture(&root, &excludes)).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("[PipelineExecutor] Workspace scan failed: {}", e);
                None
            }
        }
    }
}

fn emit(events: &Option<EventSender>, event: PipelineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::{event_channel, EventReceiver};
    use std::path::Path;

    fn load(dir: &Path, yaml: &str) -> PipelineDefinition {
        let mut definition = PipelineDefinition::from_yaml(yaml).unwrap();
        definition.file = dir.join("test.yaml");
        definition
    }

    fn executor(dir: &Path) -> PipelineExecutor {
        PipelineExecutor::new(ExecutorConfig::new(dir))
    }

    fn drain(rx: &mut EventReceiver) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn started_indices(events: &[PipelineEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StepStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    const SKIP_PIPELINE: &str = r#"
agent:
  cmd: sh
  args: ["-c", "echo fixed"]
steps:
  - name: analyze
    prompt: "Analyze"
    agent:
      cmd: sh
      args: ["-c", "printf 'all clear'"]
  - name: fix
    prompt: "Fix {{analyze.output}}"
    when: "{{analyze.output}} contains issue"
"#;

    #[tokio::test]
    async fn test_false_condition_skips_silently_and_clears_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(dir.path(), SKIP_PIPELINE);
        let exec = executor(dir.path());
        let (tx, mut rx) = event_channel();

        let summary = exec
            .run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.executed, vec!["analyze"]);
        assert_eq!(summary.skipped, vec!["fix"]);
        assert_eq!(started_indices(&drain(&mut rx)), vec![0]);
        assert!(!exec.checkpoints().exists(&definition.file).await);
    }

    #[tokio::test]
    async fn test_event_order_for_successful_step() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "printf done"]
steps:
  - name: only
    prompt: "Do {{context.missing}}"
"#,
        );
        let exec = PipelineExecutor::new(ExecutorConfig::new(dir.path()).with_file_tracking(false));
        let (tx, mut rx) = event_channel();
        exec.run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            PipelineEvent::StepStarted {
                index: 0,
                prompt: "Do {{context.missing}}".to_string(),
            }
        );
        assert_eq!(
            events[1],
            PipelineEvent::StepOutput {
                index: 0,
                output: "done".to_string(),
            }
        );
        assert!(matches!(
            events[2],
            PipelineEvent::StepCompleted { index: 0, error: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "echo ok"]
steps:
  - name: first
    prompt: "one"
  - name: broken
    prompt: "two"
    agent:
      cmd: sh
      args: ["-c", "echo boom; exit 2"]
  - name: never
    prompt: "three"
"#,
        );
        let exec = executor(dir.path());
        let (tx, mut rx) = event_channel();

        let err = exec
            .run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::StepFailed { ref step, .. } => assert_eq!(step, "broken"),
            ref other => panic!("unexpected error: {other:?}"),
        }

        let events = drain(&mut rx);
        assert_eq!(started_indices(&events), vec![0, 1]);
        let last = events.last().unwrap();
        match last {
            PipelineEvent::StepCompleted { index, error, .. } => {
                assert_eq!(*index, 1);
                assert!(error.as_deref().unwrap().contains("boom"));
            }
            other => panic!("unexpected last event: {other:?}"),
        }

        let record = exec.checkpoints().load(&definition.file).await.unwrap().unwrap();
        assert_eq!(record.last_completed_step, 0);
        assert_eq!(record.outputs.get("first").map(String::as_str), Some("ok\n"));
        assert!(!record.outputs.contains_key("broken"));
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps_and_restores_outputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fail"), "").unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "echo ok"]
steps:
  - name: first
    prompt: "one"
    agent:
      cmd: sh
      args: ["-c", "echo first >> calls.log; printf FIRST"]
  - name: second
    prompt: "got {{first.output}}"
    agent:
      cmd: sh
      args: ["-c", 'if [ -f fail ]; then exit 1; fi; echo second >> calls.log; printf "%s" "$0"']
"#,
        );
        let exec = executor(dir.path());
        let cancel = CancellationToken::new();

        assert!(exec.run(&definition, true, None, &cancel).await.is_err());
        std::fs::remove_file(dir.path().join("fail")).unwrap();

        let summary = exec.run(&definition, true, None, &cancel).await.unwrap();
        assert_eq!(summary.resumed_from, Some(1));
        assert_eq!(summary.executed, vec!["second"]);

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(calls, "first\nsecond\n");
        assert!(!exec.checkpoints().exists(&definition.file).await);
    }

    #[tokio::test]
    async fn test_resumed_prompt_sees_restored_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", 'printf "%s" "$0" > last_prompt.txt']
steps:
  - name: first
    prompt: "one"
  - name: second
    prompt: "got {{first.output}}"
"#,
        );
        let exec = executor(dir.path());
        let mut outputs = indexmap::IndexMap::new();
        outputs.insert("first".to_string(), "FIRST".to_string());
        let mut record = CheckpointRecord::new("test.yaml", 0, outputs, Utc::now());
        exec.checkpoints().save(&mut record).await.unwrap();

        exec.run(&definition, true, None, &CancellationToken::new())
            .await
            .unwrap();

        let prompt = std::fs::read_to_string(dir.path().join("last_prompt.txt")).unwrap();
        assert!(prompt.contains("=== OUTPUT PASOS ANTERIORES ===\n[first]:\nFIRST\n\n"));
        assert!(prompt.ends_with("=== NUEVA TAREA ===\ngot FIRST"));
    }

    const ARTIFACT_RESUME_PIPELINE: &str = r#"
agent:
  cmd: sh
  args: ["-c", 'if [ -f fail ]; then exit 1; fi; printf "%s" "$0" > last_prompt.txt']
steps:
  - name: read
    prompt: "read the notes"
    load_from: notes.md
    agent:
      cmd: sh
      args: ["-c", "printf ok"]
  - name: use
    prompt: "notes: {{artifact.notes}}"
    when: "{{artifact.notes}} contains secret"
"#;

    async fn last_prompt_after_run(fail_first: bool) -> String {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(dir.path(), ARTIFACT_RESUME_PIPELINE);
        let exec = executor(dir.path());
        exec.artifacts().save("notes.md", "SECRET").await.unwrap();
        let cancel = CancellationToken::new();

        if fail_first {
            std::fs::write(dir.path().join("fail"), "").unwrap();
            assert!(exec.run(&definition, false, None, &cancel).await.is_err());
            std::fs::remove_file(dir.path().join("fail")).unwrap();

            let record = exec.checkpoints().load(&definition.file).await.unwrap().unwrap();
            assert_eq!(record.artifacts.get("notes").map(String::as_str), Some("SECRET"));

            let summary = exec.run(&definition, true, None, &cancel).await.unwrap();
            assert_eq!(summary.executed, vec!["use"]);
        } else {
            exec.run(&definition, false, None, &cancel).await.unwrap();
        }

        std::fs::read_to_string(dir.path().join("last_prompt.txt")).unwrap()
    }

    #[tokio::test]
    async fn test_resume_restores_loaded_artifacts() {
        let straight = last_prompt_after_run(false).await;
        let resumed = last_prompt_after_run(true).await;

        assert!(straight.contains("[artifact.notes]:\nSECRET\n\n"));
        assert!(straight.ends_with("notes: SECRET"));
        assert_eq!(resumed, straight);
    }

    #[tokio::test]
    async fn test_stale_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(dir.path(), SKIP_PIPELINE);
        let exec = executor(dir.path());
        let mut record = CheckpointRecord::new("test.yaml", 4, Default::default(), Utc::now());
        exec.checkpoints().save(&mut record).await.unwrap();

        let err = exec
            .run(&definition, true, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StaleCheckpoint { last_completed: 4, step_count: 2 }
        ));
    }

    #[tokio::test]
    async fn test_without_resume_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(dir.path(), SKIP_PIPELINE);
        let exec = executor(dir.path());
        let mut record = CheckpointRecord::new("test.yaml", 4, Default::default(), Utc::now());
        exec.checkpoints().save(&mut record).await.unwrap();

        let summary = exec
            .run(&definition, false, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.resumed_from, None);
        assert_eq!(summary.executed, vec!["analyze"]);
    }

    #[tokio::test]
    async fn test_artifacts_flow_between_steps() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "printf 'three issues'"]
steps:
  - name: analyze
    prompt: "Analyze"
    save_to: analysis.md
  - name: report
    prompt: "Report on {{artifact.analysis}}"
    load_from: analysis.md
    when: "{{analyze.output}} not_empty"
    agent:
      cmd: sh
      args: ["-c", 'printf "%s" "$0" | tail -n 1']
"#,
        );
        let exec = executor(dir.path());
        let (tx, mut rx) = event_channel();
        exec.run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(exec.artifacts().load("analysis.md").await.unwrap(), "three issues");
        let outputs: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::StepOutput { output, .. } => Some(output),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["three issues", "Report on three issues"]);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", 'printf "%s" "$0" | tail -n 1']
steps:
  - name: report
    prompt: "Report on {{artifact.missing}}"
    load_from: missing.md
"#,
        );
        let exec = executor(dir.path());
        let (tx, mut rx) = event_channel();
        exec.run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        assert!(drain(&mut rx).contains(&PipelineEvent::StepOutput {
            index: 0,
            output: "Report on {{artifact.missing}}".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_streaming_emits_lines_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "echo one; echo two"]
steps:
  - name: stream
    prompt: "go"
"#,
        );
        let exec = PipelineExecutor::new(
            ExecutorConfig::new(dir.path()).with_output_mode(OutputMode::Streaming),
        );
        let (tx, mut rx) = event_channel();
        exec.run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        let events = drain(&mut rx);
        let lines: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::StepOutputLine { line, .. } => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["one", "two"]);

        let completed_at = events
            .iter()
            .position(|e| matches!(e, PipelineEvent::StepCompleted { .. }))
            .unwrap();
        let last_line_at = events
            .iter()
            .rposition(|e| matches!(e, PipelineEvent::StepOutputLine { .. }))
            .unwrap();
        assert!(last_line_at < completed_at);
    }

    #[tokio::test]
    async fn test_files_changed_event() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(
            dir.path(),
            r#"
agent:
  cmd: sh
  args: ["-c", "mkdir -p src && echo x > src/new.rs"]
steps:
  - name: write
    prompt: "write a file"
    save_to: notes.md
"#,
        );
        let exec = executor(dir.path());
        let (tx, mut rx) = event_channel();
        exec.run(&definition, false, Some(tx), &CancellationToken::new())
            .await
            .unwrap();

        assert!(drain(&mut rx).contains(&PipelineEvent::FilesChanged {
            index: 0,
            changes: vec!["+ src/new.rs".to_string()],
        }));
    }

    #[tokio::test]
    async fn test_unwritable_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state_root = dir.path().join("state-root");
        std::fs::create_dir_all(&state_root).unwrap();
        std::fs::write(state_root.join("state"), "not a directory").unwrap();

        let definition = load(dir.path(), SKIP_PIPELINE);
        let exec = PipelineExecutor::new(ExecutorConfig::new(dir.path()).with_state_root(&state_root));

        let err = exec
            .run(&definition, false, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointIo(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let definition = load(dir.path(), SKIP_PIPELINE);
        let exec = executor(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = event_channel();

        let err = exec.run(&definition, false, Some(tx), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(drain(&mut rx).is_empty());
    }
}
