//! Hugging Face Inference API text-generation provider.

use crate::client::HttpClient;
use parley_types::provider::{CompletionFuture, Provider};
use parley_types::{ApiError, ChatMessage, ChatRequest, Role};
use serde::Deserialize;
use serde_json::json;

/// Default `max_new_tokens` when the request sets none.
const DEFAULT_MAX_NEW_TOKENS: u32 = 512;

/// Chat over a text-generation model: the conversation is rendered into a
/// single prompt and the generated continuation is the reply.
#[derive(Clone)]
pub struct HuggingFaceProvider {
    client: HttpClient,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GenerationResponse {
    Batch(Vec<Generated>),
    Single(Generated),
}

#[derive(Deserialize)]
struct Generated {
    generated_text: String,
}

impl HuggingFaceProvider {
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}", self.base_url)
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let mut parameters = json!({
            "max_new_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
            "return_full_text": false,
        });
        if let Some(temperature) = request.temperature {
            parameters["temperature"] = json!(temperature);
        }
        let body = json!({
            "inputs": render_prompt(&request.messages),
            "parameters": parameters,
            "options": {"wait_for_model": true},
        });

        let response = self
            .client
            .post_json(&self.endpoint(&request.model), &body)
            .await?;
        parse_generation(response)
    }
}

/// Render a conversation as a plain-text prompt ending with an open
/// assistant turn.
pub fn render_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(message.content.trim());
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

fn parse_generation(response: serde_json::Value) -> Result<String, ApiError> {
    let parsed: GenerationResponse = serde_json::from_value(response)
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    let generated = match parsed {
        GenerationResponse::Batch(items) => items.into_iter().next(),
        GenerationResponse::Single(item) => Some(item),
    };
    generated
        .map(|g| g.generated_text.trim().to_string())
        .ok_or_else(|| ApiError::InvalidResponse("no generated text".into()))
}

impl Provider for HuggingFaceProvider {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}
