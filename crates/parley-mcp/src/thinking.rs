//! Wire mapping for the sequential-thinking tool.

use crate::error::McpError;
use parley_types::{RecommendedTool, ResolvedThinking, ThinkingStep};
use serde::Deserialize;
use serde_json::{Value, json};

/// Tool name exposed by the sequential-thinking server.
pub const SEQUENTIAL_THINKING_TOOL: &str = "sequentialthinking";

/// Arguments for one `tools/call` of the thinking tool.
pub(crate) fn arguments(thought: &str, step: &ResolvedThinking) -> Value {
    let mut args = json!({
        "thought": thought,
        "thoughtNumber": step.step_number,
        "totalThoughts": step.total_steps,
        "nextThoughtNeeded": step.next_step_needed,
    });
    if step.is_revision {
        args["isRevision"] = Value::Bool(true);
        if let Some(revises) = step.revises_step {
            args["revisesThought"] = json!(revises);
        }
    }
    args
}

/// What the server reports back inside its text content, when it is JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepReport {
    #[serde(alias = "stepNumber")]
    thought_number: Option<u32>,
    #[serde(alias = "totalSteps")]
    total_thoughts: Option<u32>,
    #[serde(alias = "nextStepNeeded")]
    next_thought_needed: Option<bool>,
    is_revision: Option<bool>,
    thought: Option<String>,
    #[serde(default, alias = "recommended_tools")]
    recommended_tools: Vec<RecommendedTool>,
    #[serde(alias = "current_step")]
    current_step: Option<CurrentStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentStep {
    #[serde(default, alias = "recommended_tools")]
    recommended_tools: Vec<RecommendedTool>,
}

/// Reshape a raw tool result into a [`ThinkingStep`].
///
/// The result must carry a `content` array with a text item; anything else
/// is an invalid response rather than a half-filled step.
pub(crate) fn parse_step(
    thought: &str,
    requested: &ResolvedThinking,
    result: &Value,
) -> Result<ThinkingStep, McpError> {
    let invalid = |message: &str| McpError::InvalidToolResponse {
        tool: SEQUENTIAL_THINKING_TOOL.to_string(),
        message: message.to_string(),
    };

    let content = result
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing content"))?;
    let text = content
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("no text content"))?;

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(invalid(text));
    }

    let report: StepReport = serde_json::from_str(text).unwrap_or_default();
    let step_number = report.thought_number.unwrap_or(requested.step_number).max(1);
    let total_steps = report
        .total_thoughts
        .unwrap_or(requested.total_steps)
        .max(step_number);
    let mut recommended_tools = report.recommended_tools;
    if let Some(current) = report.current_step {
        recommended_tools.extend(current.recommended_tools);
    }

    Ok(ThinkingStep {
        step_number,
        total_steps,
        thought: report.thought.unwrap_or_else(|| thought.to_string()),
        next_step_needed: report
            .next_thought_needed
            .unwrap_or(requested.next_step_needed),
        is_revision: report.is_revision.unwrap_or(requested.is_revision),
        recommended_tools,
    })
}
