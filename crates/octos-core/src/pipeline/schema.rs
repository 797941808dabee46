//! YAML schema types for pipeline definitions.
//!
//! A pipeline YAML defines the default agent, some shared context and an
//! ordered list of steps:
//!
//! ```yaml
//! agent:
//!   cmd: claude
//!   args: ["-p", "--dangerously-skip-permissions"]
//!   timeout_secs: 900
//!
//! context:
//!   project: "billing-service"
//!   rules:
//!     - "Never touch the migrations folder"
//!     - "Write tests for every change"
//!
//! steps:
//!   - name: analyze
//!     prompt: "Analyze the codebase and list any issues.\n{{context.rules}}"
//!     save_to: analysis.md
//!
//!   - name: fix
//!     when: "{{analyze.output}} contains issue"
//!     prompt: "Fix the issues found:\n{{analyze.output}}"
//!     agent:
//!       cmd: codex
//!       args: ["exec"]
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Top-level pipeline definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Path the definition was loaded from. Used to key the checkpoint.
    #[serde(skip)]
    pub file: PathBuf,

    /// Default agent for every step without its own override
    #[serde(default)]
    pub agent: AgentInvocation,

    /// Read-only values shared with every step
    #[serde(default)]
    pub context: IndexMap<String, ContextValue>,

    /// Ordered list of steps
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// External command used to run an agent. The composed prompt is appended
/// as the final argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocation {
    #[serde(default)]
    pub cmd: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Deadline for a single invocation; the executor default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra environment variables for the agent process
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

/// A single step in the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    /// Step name, also the key of its output (`{{<name>.output}}`)
    #[serde(default)]
    pub name: String,

    /// Prompt template
    #[serde(default)]
    pub prompt: String,

    /// Artifact file the step output is written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,

    /// Artifact file loaded before the prompt is built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_from: Option<String>,

    /// Condition controlling whether the step runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Agent override; the pipeline agent is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInvocation>,
}

/// A context entry: either a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    List(Vec<ScalarValue>),
    Scalar(ScalarValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => Ok(()),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Float(x) => write!(f, "{}", x),
            ScalarValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Scalar(v) => write!(f, "{}", v),
            ContextValue::List(items) => {
                let joined: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

impl ContextValue {
    /// Render for `{{context.<key>}}`: lists become a dash-prefixed bullet
    /// list, scalars their string form.
    pub fn render(&self) -> String {
        match self {
            ContextValue::Scalar(v) => v.to_string(),
            ContextValue::List(items) => items
                .iter()
                .map(|v| format!("- {}", v))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl PipelineDefinition {
    /// Parse and validate a pipeline definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let definition: PipelineDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::Config(format!("Failed to parse pipeline YAML: {}", e)))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load and validate a pipeline definition from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read pipeline file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let mut definition = Self::from_yaml(&content)?;
        definition.file = path.to_path_buf();
        Ok(definition)
    }

    /// Check the definition before anything runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.agent.cmd.trim().is_empty() {
            return Err(PipelineError::Config("agent.cmd is required".to_string()));
        }

        if self.steps.is_empty() {
            return Err(PipelineError::Config(
                "at least one step is required".to_string(),
            ));
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            let position = i + 1;
            if step.name.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "step {}: name is required",
                    position
                )));
            }
            if step.prompt.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "step {} ({}): prompt is required",
                    position, step.name
                )));
            }
            if let Some(first) = seen.insert(step.name.as_str(), position) {
                return Err(PipelineError::Config(format!(
                    "step {} ({}): duplicate step name, already used by step {}",
                    position, step.name, first
                )));
            }
            if let Some(ref agent) = step.agent {
                if agent.cmd.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "step {} ({}): agent.cmd is required when overriding the agent",
                        position, step.name
                    )));
                }
            }
            for (field, artifact) in [("save_to", &step.save_to), ("load_from", &step.load_from)] {
                if let Some(name) = artifact {
                    if !is_plain_file_name(name) {
                        return Err(PipelineError::Config(format!(
                            "step {} ({}): {} must be a plain file name, got '{}'",
                            position, step.name, field, name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// The agent a step runs with: its own override, or the pipeline default.
    pub fn agent_for<'a>(&'a self, step: &'a Step) -> &'a AgentInvocation {
        step.agent.as_ref().unwrap_or(&self.agent)
    }

    /// Base name of the pipeline file, used to key its checkpoint.
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "pipeline".to_string())
    }
}

/// True for names that stay inside the artifacts directory.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}
