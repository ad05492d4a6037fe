//! Provider trait for language-model backends.

use crate::{ApiError, ChatRequest};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider::complete`].
pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ApiError>> + Send + 'a>>;

/// A language-model backend: send role/content messages, get back text.
///
/// Dyn-compatible so the orchestrator works with `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Run a single completion and return the assistant text.
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a>;

    /// Provider name for logging/display (e.g., "openrouter").
    fn name(&self) -> &str;
}
