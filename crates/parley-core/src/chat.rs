//! One chat turn: select tools, run them, merge their results, ask the provider.

use std::sync::Arc;

use futures_util::future::join_all;
use parley_types::provider::Provider;
use parley_types::{
    ChatError, ChatMessage, ChatRequest, SequentialThinker, ThinkingOptions, ThinkingStep,
    ToolCall, ToolExecutor, ToolOutput, last_user_message, util::clip,
};
use tokio_util::sync::CancellationToken;

use crate::selection::SelectionPolicy;

/// Opening line of the merged tool-results system message.
pub const TOOL_RESULTS_PREAMBLE: &str =
    "Use the following tool results to answer the user's latest message. \
     Prefer them over prior knowledge where they apply.";

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A tool call is about to run.
    ToolStart { call: String },
    /// A tool call finished; failed calls are left out of the prompt.
    ToolEnd { call: String, ok: bool },
    /// A sequential-thinking step completed.
    Thinking(ThinkingStep),
    /// The provider has answered.
    Done,
}

/// A successful tool call and what it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call: ToolCall,
    pub output: ToolOutput,
}

/// The outcome of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    /// `server/tool` of every call whose result reached the prompt.
    pub tools_used: Vec<String>,
    pub thoughts: Vec<ThinkingStep>,
}

/// Runs chat turns against a provider, enhanced by whatever tools are up.
pub struct ChatOrchestrator {
    provider: Arc<dyn Provider>,
    tools: Option<Arc<dyn ToolExecutor>>,
    thinker: Option<Arc<dyn SequentialThinker>>,
    policy: SelectionPolicy,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl ChatOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools: None,
            thinker: None,
            policy: SelectionPolicy::default(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_thinker(mut self, thinker: Arc<dyn SequentialThinker>) -> Self {
        self.thinker = Some(thinker);
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one turn over `messages`.
    ///
    /// Tool and thinking failures never fail the turn; they are logged and
    /// left out. Only a provider error or cancellation does.
    pub async fn run<F>(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<ChatReply, ChatError>
    where
        F: FnMut(ChatEvent),
    {
        let user_message = last_user_message(messages).ok_or(ChatError::EmptyConversation)?;

        let calls = self.available_calls(user_message);
        for call in &calls {
            on_event(ChatEvent::ToolStart {
                call: call.to_string(),
            });
        }

        let enhancements = async {
            tokio::join!(self.run_tools(&calls), self.run_thinking(user_message))
        };
        let (outcomes, thoughts) = tokio::select! {
            out = enhancements => out,
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        };

        let mut results = Vec::new();
        for (call, outcome) in calls.into_iter().zip(outcomes) {
            on_event(ChatEvent::ToolEnd {
                call: call.to_string(),
                ok: outcome.is_some(),
            });
            if let Some(output) = outcome {
                results.push(ToolResult { call, output });
            }
        }
        for step in &thoughts {
            on_event(ChatEvent::Thinking(step.clone()));
        }

        let prompt = merge_tool_results(
            messages,
            &results,
            &thoughts,
            self.policy.max_result_bytes,
        );
        let request = ChatRequest {
            model: self.model.clone(),
            messages: prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        tracing::debug!(
            "Sending {} messages to {} ({} tool results, {} thinking steps)",
            request.messages.len(),
            self.provider.name(),
            results.len(),
            thoughts.len()
        );
        let text = tokio::select! {
            reply = self.provider.complete(&request) => reply?,
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        };
        on_event(ChatEvent::Done);

        Ok(ChatReply {
            text,
            tools_used: results.iter().map(|r| r.call.to_string()).collect(),
            thoughts,
        })
    }

    /// Selected calls whose server can take them right now.
    fn available_calls(&self, message: &str) -> Vec<ToolCall> {
        let Some(tools) = &self.tools else {
            return Vec::new();
        };
        self.policy
            .select_tools(message)
            .into_iter()
            .filter(|call| {
                let available = tools.is_available(&call.server);
                if !available {
                    tracing::debug!("Skipping {call}: server '{}' is not connected", call.server);
                }
                available
            })
            .collect()
    }

    /// Run every call concurrently, each in its own failure boundary.
    async fn run_tools(&self, calls: &[ToolCall]) -> Vec<Option<ToolOutput>> {
        let Some(tools) = &self.tools else {
            return vec![None; calls.len()];
        };
        join_all(calls.iter().map(|call| async move {
            match tools.execute(call).await {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::warn!("Tool {call} failed: {e}");
                    None
                }
            }
        }))
        .await
    }

    /// Sequential thinking for messages that ask for it. Stops at the first
    /// failure, keeping the steps gathered so far.
    async fn run_thinking(&self, message: &str) -> Vec<ThinkingStep> {
        let mut steps = Vec::new();
        let Some(thinker) = &self.thinker else {
            return steps;
        };
        if !self.policy.wants_thinking(message) {
            return steps;
        }

        let total = self.policy.thinking_steps;
        for number in 1..=total {
            let thought = if number == 1 {
                message.to_string()
            } else {
                format!("Continue reasoning (step {number} of {total}) about: {message}")
            };
            match thinker.think(&thought, ThinkingOptions::step(number, total)).await {
                Ok(step) => {
                    let more = step.next_step_needed;
                    steps.push(step);
                    if !more {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Sequential thinking failed at step {number}: {e}");
                    break;
                }
            }
        }
        steps
    }
}

/// Prepend one system message carrying every tool result and the thinking
/// transcript. Without either, `messages` is returned unchanged.
pub fn merge_tool_results(
    messages: &[ChatMessage],
    results: &[ToolResult],
    thoughts: &[ThinkingStep],
    max_result_bytes: usize,
) -> Vec<ChatMessage> {
    if results.is_empty() && thoughts.is_empty() {
        return messages.to_vec();
    }

    let mut sections = vec![TOOL_RESULTS_PREAMBLE.to_string()];
    for result in results {
        sections.push(format!(
            "### {}\n{}",
            result.call,
            clip(&result.output.to_text(), max_result_bytes)
        ));
    }
    if !thoughts.is_empty() {
        let transcript: Vec<String> = thoughts.iter().map(|s| s.transcript_line()).collect();
        sections.push(format!("### sequential thinking\n{}", transcript.join("\n")));
    }

    let mut merged = Vec::with_capacity(messages.len() + 1);
    merged.push(ChatMessage::system(sections.join("\n\n")));
    merged.extend_from_slice(messages);
    merged
}
