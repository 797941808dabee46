//! `when` conditions.
//!
//! Grammar, checked in this order:
//!
//! ```text
//! <expr> contains <needle>   case-insensitive substring match
//! <expr> equals <value>      exact, case-sensitive match
//! <expr> not_empty           substituted expression is not blank
//! ```
//!
//! Both operands are trimmed of surrounding whitespace and quotes after
//! `{{<step>.output}}` / `{{artifact.<name>}}` substitution. An empty
//! condition always runs; anything else that does not match the grammar
//! also runs.

use super::context::ExecutionContext;

const CONTAINS: &str = " contains ";
const EQUALS: &str = " equals ";
const NOT_EMPTY: &str = "not_empty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Contains { haystack: String, needle: String },
    Equals { left: String, right: String },
    NotEmpty(String),
    Unrecognized(String),
}

impl Condition {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Condition::Always;
        }

        if let Some((haystack, needle)) = trimmed.split_once(CONTAINS) {
            return Condition::Contains {
                haystack: haystack.to_string(),
                needle: needle.to_string(),
            };
        }

        if let Some((left, right)) = trimmed.split_once(EQUALS) {
            return Condition::Equals {
                left: left.to_string(),
                right: right.to_string(),
            };
        }

        if trimmed == NOT_EMPTY {
            return Condition::NotEmpty(String::new());
        }
        if let Some(expr) = trimmed.strip_suffix(NOT_EMPTY) {
            if expr.ends_with(char::is_whitespace) {
                return Condition::NotEmpty(expr.to_string());
            }
        }

        Condition::Unrecognized(trimmed.to_string())
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let operand = |text: &str| trim_operand(&ctx.substitute_references(text)).to_string();

        match self {
            Condition::Always => true,
            Condition::Contains { haystack, needle } => operand(haystack)
                .to_lowercase()
                .contains(&operand(needle).to_lowercase()),
            Condition::Equals { left, right } => operand(left) == operand(right),
            Condition::NotEmpty(expr) => !operand(expr).is_empty(),
            Condition::Unrecognized(raw) => {
                tracing::debug!(
                    "[Condition] Unrecognized condition '{}', running step",
                    raw
                );
                true
            }
        }
    }
}

/// Evaluate an optional `when` string against the current context.
pub fn should_run(when: Option<&str>, ctx: &ExecutionContext) -> bool {
    match when {
        Some(raw) => Condition::parse(raw).evaluate(ctx),
        None => true,
    }
}

fn trim_operand(text: &str) -> &str {
    text.trim_matches(|c: char| c == '\'' || c == '"' || c.is_whitespace())
}
