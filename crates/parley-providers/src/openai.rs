//! OpenAI-compatible `/chat/completions` provider (OpenRouter, GPTGOD).

use crate::client::HttpClient;
use parley_types::provider::{CompletionFuture, Provider};
use parley_types::{ApiError, ChatRequest};
use serde::Deserialize;

/// A provider speaking the OpenAI chat-completions dialect.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    client: HttpClient,
    base_url: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;
        let response = self.client.post_json(&self.endpoint(), &body).await?;
        parse_completion(response)
    }
}

/// Pull the assistant text out of a chat-completions response.
fn parse_completion(response: serde_json::Value) -> Result<String, ApiError> {
    let parsed: CompletionResponse = serde_json::from_value(response)
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ApiError::InvalidResponse("response has no message content".into()))
}

impl Provider for OpenAiCompatProvider {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
