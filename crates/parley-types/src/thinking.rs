//! Sequential-thinking step model.
//!
//! A sequential-thinking tool returns step-structured reasoning instead of a
//! flat result. Callers pass [`ThinkingOptions`], which are normalised with
//! [`ThinkingOptions::resolve`] before going on the wire, and get back a
//! [`ThinkingStep`].

use serde::{Deserialize, Serialize};

/// Caller-supplied step hints. Unset fields are defaulted by [`resolve`](Self::resolve).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkingOptions {
    pub step_number: Option<u32>,
    pub total_steps: Option<u32>,
    pub next_step_needed: Option<bool>,
    pub is_revision: bool,
    pub revises_step: Option<u32>,
}

/// Step hints after validation and defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedThinking {
    pub step_number: u32,
    pub total_steps: u32,
    pub next_step_needed: bool,
    pub is_revision: bool,
    pub revises_step: Option<u32>,
}

impl ThinkingOptions {
    pub fn step(step_number: u32, total_steps: u32) -> Self {
        Self {
            step_number: Some(step_number),
            total_steps: Some(total_steps),
            ..Self::default()
        }
    }

    /// Validate and default the hints.
    ///
    /// Steps are 1-based; a total smaller than the current step is raised to
    /// it, and `next_step_needed` defaults to "not yet at the last step".
    pub fn resolve(&self) -> ResolvedThinking {
        let step_number = self.step_number.unwrap_or(1).max(1);
        let total_steps = self
            .total_steps
            .unwrap_or(step_number)
            .max(1)
            .max(step_number);
        let next_step_needed = self
            .next_step_needed
            .unwrap_or(step_number < total_steps);
        ResolvedThinking {
            step_number,
            total_steps,
            next_step_needed,
            is_revision: self.is_revision,
            revises_step: self.revises_step.filter(|_| self.is_revision),
        }
    }
}

/// A tool the thinking server suggests for the current step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedTool {
    #[serde(alias = "tool_name", alias = "toolName")]
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

/// One step of a sequential-thinking transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingStep {
    pub step_number: u32,
    pub total_steps: u32,
    pub thought: String,
    pub next_step_needed: bool,
    #[serde(default)]
    pub is_revision: bool,
    #[serde(default)]
    pub recommended_tools: Vec<RecommendedTool>,
}

impl ThinkingStep {
    /// Render as one transcript line, e.g. `Step 2/3: check the logs`.
    pub fn transcript_line(&self) -> String {
        let mut line = format!(
            "Step {}/{}{}: {}",
            self.step_number,
            self.total_steps,
            if self.is_revision { " (revision)" } else { "" },
            self.thought
        );
        if !self.recommended_tools.is_empty() {
            let tools: Vec<String> = self
                .recommended_tools
                .iter()
                .map(|t| format!("{} ({:.2})", t.name, t.confidence))
                .collect();
            line.push_str(&format!(" [suggested tools: {}]", tools.join(", ")));
        }
        line
    }
}
