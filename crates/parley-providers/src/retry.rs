//! When, and how long, to wait before re-sending a provider request.

use std::time::Duration;

use parley_types::ApiError;
use rand::Rng;
use serde::Deserialize;

/// How failed provider requests are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Backoff before the first retry, doubling for each one after it.
    pub base_delay: Duration,
    /// Cap for computed backoff and for `Retry-After`.
    pub max_delay: Duration,
    /// Cap for the `estimated_time` a loading Hugging Face model announces.
    pub max_model_load_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_model_load_wait: Duration::from_secs(120),
        }
    }
}

/// What a failed response said about when to come back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerHint {
    /// `Retry-After` header, in seconds.
    RetryAfter(Duration),
    /// `estimated_time` in the body of a 503 from a model that is still loading.
    ModelLoading(Duration),
}

impl ServerHint {
    /// Read a hint from the `Retry-After` header value and the error body.
    /// The header wins when both are present.
    pub fn from_response(retry_after: Option<&str>, body: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct Loading {
            estimated_time: Option<f64>,
        }

        if let Some(wait) = retry_after.and_then(|v| v.trim().parse().ok()).and_then(seconds) {
            return Some(Self::RetryAfter(wait));
        }
        serde_json::from_str::<Loading>(body)
            .ok()
            .and_then(|loading| loading.estimated_time)
            .and_then(seconds)
            .map(Self::ModelLoading)
    }
}

fn seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The wait before retry number `attempt + 1`, or `None` when `error` is
    /// final or the retries are used up.
    pub fn delay_for(
        &self,
        attempt: u32,
        error: &ApiError,
        hint: Option<ServerHint>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries || !is_transient(error) {
            return None;
        }
        Some(match hint {
            Some(ServerHint::RetryAfter(wait)) => wait.min(self.max_delay),
            Some(ServerHint::ModelLoading(wait)) => wait.min(self.max_model_load_wait),
            None => self.backoff(attempt),
        })
    }

    /// `base × 2^attempt`, capped, with the actual wait drawn from its upper half.
    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let floor = ceiling / 2;
        let spread = (ceiling - floor).as_millis() as u64;
        floor + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// Rate limits, overload, 5xx, and transport failures are worth another try.
/// Other statuses mean the request itself is wrong.
fn is_transient(error: &ApiError) -> bool {
    match error {
        ApiError::RateLimited { .. }
        | ApiError::Overloaded
        | ApiError::Network(_)
        | ApiError::Timeout => true,
        ApiError::Server { status, .. } => *status >= 500,
        _ => false,
    }
}
