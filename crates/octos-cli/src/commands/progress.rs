//! Headless presentation of executor events.

use console::style;
use octos_core::pipeline::EventReceiver;
use octos_core::{PipelineDefinition, PipelineEvent};

/// Prints step progress to stdout as events arrive.
pub struct ProgressPrinter {
    step_names: Vec<String>,
    quiet: bool,
    streamed: bool,
}

impl ProgressPrinter {
    pub fn new(definition: &PipelineDefinition, quiet: bool, streamed: bool) -> Self {
        Self {
            step_names: definition.steps.iter().map(|s| s.name.clone()).collect(),
            quiet,
            streamed,
        }
    }

    /// Drain the channel until the executor drops its sender.
    pub async fn consume(self, mut rx: EventReceiver) {
        while let Some(event) = rx.recv().await {
            self.print(&event);
        }
    }

    fn name(&self, index: usize) -> &str {
        self.step_names
            .get(index)
            .map(String::as_str)
            .unwrap_or("?")
    }

    fn print(&self, event: &PipelineEvent) {
        let total = self.step_names.len();
        let name = self.name(event.index());
        match event {
            PipelineEvent::StepStarted { index, .. } => {
                println!(
                    "\n{} Running step {}/{}: {}",
                    style("→").cyan(),
                    index + 1,
                    total,
                    style(name).bold()
                );
            }
            PipelineEvent::StepOutputLine { line, .. } => {
                if !self.quiet {
                    println!("  {} {}", style("│").dim(), line);
                }
            }
            PipelineEvent::StepOutput { output, .. } => {
                // Streamed lines were already shown.
                if !self.quiet && !self.streamed {
                    for line in output.lines() {
                        println!("  {} {}", style("│").dim(), line);
                    }
                }
            }
            PipelineEvent::FilesChanged { changes, .. } => {
                println!("  {} file(s) changed by {}:", changes.len(), name);
                for change in changes {
                    println!("    {}", style(change).yellow());
                }
            }
            PipelineEvent::StepCompleted { duration, error, .. } => match error {
                None => println!(
                    "{} {} ({:.1}s)",
                    style("✓").green(),
                    name,
                    duration.as_secs_f64()
                ),
                Some(err) => println!(
                    "{} {} failed after {:.1}s: {}",
                    style("✗").red(),
                    name,
                    duration.as_secs_f64(),
                    err
                ),
            },
        }
    }
}
