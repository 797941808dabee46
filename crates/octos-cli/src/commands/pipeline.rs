//! `octos run` / `octos validate`.

use std::path::Path;
use std::time::Duration;

use octos_core::pipeline::event_channel;
use octos_core::{ExecutorConfig, OutputMode, PipelineDefinition, PipelineExecutor};
use tokio_util::sync::CancellationToken;

use super::progress::ProgressPrinter;
use super::Paths;

pub struct RunOptions {
    pub resume: bool,
    pub loops: u32,
    pub stream: bool,
    pub quiet: bool,
    pub timeout_secs: u64,
    pub track_file_changes: bool,
}

/// Run a pipeline headlessly, `loops` times in a row.
pub async fn run(paths: &Paths, pipeline_file: &Path, options: RunOptions) -> Result<(), String> {
    let definition = PipelineDefinition::from_file(pipeline_file).map_err(|e| e.to_string())?;

    let mode = if options.stream {
        OutputMode::Streaming
    } else {
        OutputMode::Buffered
    };
    let config = ExecutorConfig::new(&paths.workspace)
        .with_state_root(&paths.state_root)
        .with_default_timeout(Duration::from_secs(options.timeout_secs))
        .with_output_mode(mode)
        .with_file_tracking(options.track_file_changes);
    let executor = PipelineExecutor::new(config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[octos] Ctrl-C received, stopping the active agent");
            ctrl_c.cancel();
        }
    });

    println!(
        "📄 Loaded pipeline: {} ({} step(s), agent: {})",
        definition.file_name(),
        definition.steps.len(),
        definition.agent.cmd
    );

    let loops = options.loops.max(1);
    for iteration in 1..=loops {
        if loops > 1 {
            println!("\n→ Loop iteration {}/{}", iteration, loops);
        }

        let (tx, rx) = event_channel();
        let printer = ProgressPrinter::new(&definition, options.quiet, options.stream);
        let consumer = tokio::spawn(printer.consume(rx));

        let resume = options.resume && iteration == 1;
        let result = executor.run(&definition, resume, Some(tx), &cancel).await;

        // The executor dropped its sender, so the printer finishes once drained.
        let _ = consumer.await;

        match result {
            Ok(summary) => {
                if let Some(from) = summary.resumed_from {
                    println!("↻ Resumed from step {}", from + 1);
                }
                if !summary.skipped.is_empty() {
                    println!("⊘ Skipped: {}", summary.skipped.join(", "));
                }
            }
            Err(e) if e.is_cancelled() => {
                return Err(format!(
                    "{}. Progress is saved; rerun with --resume to continue.",
                    e
                ));
            }
            Err(e) => {
                let hint = if matches!(e, octos_core::PipelineError::StepFailed { .. }) {
                    " Rerun with --resume to retry from the failed step."
                } else {
                    ""
                };
                return Err(format!("{}.{}", e, hint));
            }
        }
    }

    println!("\n✓ Pipeline completed");
    Ok(())
}

/// Validate a pipeline file without executing it.
pub async fn validate(pipeline_file: &Path) -> Result<(), String> {
    let definition = PipelineDefinition::from_file(pipeline_file).map_err(|e| e.to_string())?;

    println!("✅ Pipeline '{}' is valid", definition.file_name());
    println!(
        "   Agent: {} {}",
        definition.agent.cmd,
        definition.agent.args.join(" ")
    );
    println!("   Context keys: {}", definition.context.len());
    println!("   Steps: {}", definition.steps.len());

    for (i, step) in definition.steps.iter().enumerate() {
        let mut details = Vec::new();
        if let Some(ref when) = step.when {
            details.push(format!("when: {}", when));
        }
        if let Some(ref load) = step.load_from {
            details.push(format!("load: {}", load));
        }
        if let Some(ref save) = step.save_to {
            details.push(format!("save: {}", save));
        }
        if let Some(ref agent) = step.agent {
            details.push(format!("agent: {}", agent.cmd));
        }
        if details.is_empty() {
            println!("   {}. {}", i + 1, step.name);
        } else {
            println!("   {}. {} ({})", i + 1, step.name, details.join(", "));
        }
    }

    Ok(())
}
