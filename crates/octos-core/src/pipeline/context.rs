//! Execution context: the data a run accumulates, plus the prompt
//! interpolation and composition built on top of it.
//!
//! The context is owned by the executor for the whole run. Nothing else
//! mutates it; the agent runner only ever sees the composed prompt string.

use indexmap::IndexMap;

use super::schema::ContextValue;

const GLOBAL_CONTEXT_HEADER: &str = "=== CONTEXTO GLOBAL ===\n";
const PREVIOUS_OUTPUTS_HEADER: &str = "\n=== OUTPUT PASOS ANTERIORES ===\n";
const NEW_TASK_HEADER: &str = "=== NUEVA TAREA ===\n";

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Pipeline-level context, read-only for the run
    global: IndexMap<String, ContextValue>,
    /// Step name → captured output, in execution order
    outputs: IndexMap<String, String>,
    /// Artifact key (file name without extension) → loaded content
    artifacts: IndexMap<String, String>,
}

impl ExecutionContext {
    pub fn new(global: IndexMap<String, ContextValue>) -> Self {
        Self {
            global,
            outputs: IndexMap::new(),
            artifacts: IndexMap::new(),
        }
    }

    /// Restore outputs from a checkpoint snapshot.
    pub fn with_outputs(mut self, outputs: IndexMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Restore loaded artifacts from a checkpoint snapshot.
    pub fn with_artifacts(mut self, artifacts: IndexMap<String, String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn outputs(&self) -> &IndexMap<String, String> {
        &self.outputs
    }

    pub fn artifacts(&self) -> &IndexMap<String, String> {
        &self.artifacts
    }

    pub fn record_output(&mut self, step_name: &str, output: String) {
        self.outputs.insert(step_name.to_string(), output);
    }

    pub fn insert_artifact(&mut self, key: &str, content: String) {
        self.artifacts.insert(key.to_string(), content);
    }

    /// Replace `{{<step>.output}}` and `{{artifact.<name>}}` references.
    ///
    /// Replacement is literal and follows insertion order, so the result does
    /// not depend on hash ordering when one output contains another
    /// placeholder.
    pub fn substitute_references(&self, text: &str) -> String {
        let mut result = text.to_string();

        for (name, output) in &self.outputs {
            let placeholder = format!("{{{{{}.output}}}}", name);
            result = result.replace(&placeholder, output);
        }

        for (name, content) in &self.artifacts {
            let placeholder = format!("{{{{artifact.{}}}}}", name);
            result = result.replace(&placeholder, content);
        }

        result
    }

    /// Resolve a prompt template.
    ///
    /// Supported placeholders:
    /// - `{{<step>.output}}`: output of a step that already ran
    /// - `{{artifact.<name>}}`: content of a loaded artifact
    /// - `{{context.<key>}}`: a context value; lists render as `- item` lines
    ///
    /// Unknown placeholders are left untouched.
    pub fn interpolate(&self, template: &str) -> String {
        let mut result = self.substitute_references(template);

        for (key, value) in &self.global {
            let placeholder = format!("{{{{context.{}}}}}", key);
            if result.contains(&placeholder) {
                result = result.replace(&placeholder, &value.render());
            }
        }

        result
    }

    /// Build the full text sent to the agent: global context, previous
    /// outputs, then the new task. The section headers are fixed.
    pub fn compose_prompt(&self, task: &str) -> String {
        let mut prompt = String::new();

        prompt.push_str(GLOBAL_CONTEXT_HEADER);
        for (key, value) in &self.global {
            prompt.push_str(&format!("{}: {}\n", key, value));
        }

        if !self.outputs.is_empty() || !self.artifacts.is_empty() {
            prompt.push_str(PREVIOUS_OUTPUTS_HEADER);
            for (name, output) in &self.outputs {
                prompt.push_str(&format!("[{}]:\n{}\n\n", name, output));
            }
            for (name, content) in &self.artifacts {
                prompt.push_str(&format!("[artifact.{}]:\n{}\n\n", name, content));
            }
        }

        prompt.push_str(NEW_TASK_HEADER);
        prompt.push_str(task);

        prompt
    }
}
