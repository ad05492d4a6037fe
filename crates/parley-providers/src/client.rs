//! Shared HTTP client with retry for the provider backends.

use std::time::Duration;

use parley_types::ApiError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};

use crate::retry::{RetryPolicy, ServerHint};

/// Request timeout for a single completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-over-HTTP client used by every provider.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    headers: HeaderMap,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a client that authenticates with `Authorization: Bearer <api_key>`.
    pub fn new(api_key: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| ApiError::Auth {
                message: "Invalid API key format".into(),
            })?,
        );

        Ok(Self {
            http,
            headers,
            retry: RetryPolicy::default(),
        })
    }

    /// Set how transient errors (429, 503, 5xx, network) are retried.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, ApiError> {
        let value = HeaderValue::from_str(value).map_err(|e| ApiError::BadRequest {
            message: format!("Invalid header value for {name}: {e}"),
        })?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// POST `body` as JSON and return the parsed JSON response.
    ///
    /// Transient failures are retried as the [`RetryPolicy`] decides, honouring
    /// `Retry-After` and the load time of a cold Hugging Face model.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let body = serde_json::to_string(body).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let mut attempt = 0;
        loop {
            tracing::debug!(
                "POST {url} (attempt {}/{})",
                attempt + 1,
                self.retry.max_retries + 1
            );

            let result = self
                .http
                .post(url)
                .headers(self.headers.clone())
                .body(body.clone())
                .send()
                .await;

            let (err, hint) = match result {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    let body_text = response
                        .text()
                        .await
                        .map_err(|e| ApiError::Network(e.to_string()));

                    if status.is_success() {
                        let text = body_text?;
                        return serde_json::from_str(&text).map_err(|e| {
                            ApiError::InvalidResponse(format!("{e}: {}", preview(&text)))
                        });
                    }
                    let body = body_text.unwrap_or_default();
                    let hint = ServerHint::from_response(retry_after.as_deref(), &body);
                    (classify_error(status.as_u16(), &body, hint), hint)
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            let Some(delay) = self.retry.delay_for(attempt, &err, hint) else {
                return Err(err);
            };
            tracing::warn!(
                "Retryable provider error (attempt {}/{}): {err}. Retrying in {}ms...",
                attempt + 1,
                self.retry.max_retries,
                delay.as_millis(),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// First part of a body, for error messages.
fn preview(text: &str) -> String {
    parley_types::util::clip(text, 200)
}

/// Classify an HTTP error response into a typed ApiError.
///
/// Understands both `{"error": {"message": ..}}` (OpenAI style) and
/// `{"error": ".."}` (Hugging Face style) bodies.
fn classify_error(status: u16, body: &str, hint: Option<ServerHint>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum ErrorDetail {
        Message { message: Option<String> },
        Plain(String),
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| match e {
            ErrorDetail::Message { message } => message,
            ErrorDetail::Plain(message) => Some(message),
        })
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: match hint {
                Some(ServerHint::RetryAfter(wait)) => Some(wait.as_millis() as u64),
                _ => None,
            },
        },
        503 | 529 => ApiError::Overloaded,
        _ => ApiError::Server { status, message },
    }
}
