//! Language-model providers for Parley.
//!
//! A closed set of backends ([`ProviderKind`]) behind the
//! [`Provider`](parley_types::provider::Provider) capability. The kind is
//! chosen once from configuration and built with [`build_provider`].

mod client;
mod huggingface;
mod kind;
mod openai;
mod retry;

pub use client::HttpClient;
pub use huggingface::{HuggingFaceProvider, render_prompt};
pub use kind::{ProviderKind, ProviderOptions, build_provider};
pub use openai::OpenAiCompatProvider;
pub use retry::{RetryPolicy, ServerHint};
