//! The closed set of supported providers and their construction.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parley_types::provider::Provider;
use parley_types::{ApiError, ConfigError};

use crate::client::HttpClient;
use crate::huggingface::HuggingFaceProvider;
use crate::openai::OpenAiCompatProvider;
use crate::retry::RetryPolicy;

/// A supported language-model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderKind {
    #[default]
    OpenRouter,
    GptGod,
    HuggingFace,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenRouter,
        ProviderKind::GptGod,
        ProviderKind::HuggingFace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::GptGod => "gptgod",
            ProviderKind::HuggingFace => "huggingface",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::GptGod => "https://api.gptgod.online/v1",
            ProviderKind::HuggingFace => "https://api-inference.huggingface.co",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
            ProviderKind::GptGod => "gpt-4o-mini",
            ProviderKind::HuggingFace => "mistralai/Mistral-7B-Instruct-v0.2",
        }
    }

    /// Environment variables holding the API key, in lookup order.
    pub fn api_key_env(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderKind::GptGod => &["GPTGOD_API_KEY"],
            ProviderKind::HuggingFace => &["HUGGINGFACE_API_KEY", "HF_TOKEN"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "gptgod" | "gptgod0" => Ok(ProviderKind::GptGod),
            "huggingface" | "hf" => Ok(ProviderKind::HuggingFace),
            _ => Err(ConfigError::InvalidValue {
                key: "provider".into(),
                message: format!("unknown provider '{s}' (expected openrouter, gptgod or huggingface)"),
            }),
        }
    }
}

/// Everything needed to build a provider.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub kind: ProviderKind,
    pub api_key: String,
    /// Overrides [`ProviderKind::default_base_url`].
    pub base_url: Option<String>,
    pub retry: RetryPolicy,
}

impl ProviderOptions {
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.kind.default_base_url())
    }
}

/// Build the provider selected by `options.kind`.
pub fn build_provider(options: &ProviderOptions) -> Result<Arc<dyn Provider>, ApiError> {
    if options.api_key.trim().is_empty() {
        return Err(ApiError::Auth {
            message: format!(
                "no API key for {} (set {})",
                options.kind,
                options.kind.api_key_env().join(" or ")
            ),
        });
    }

    let client = HttpClient::new(&options.api_key)?.with_retry(options.retry.clone());
    let base_url = options.base_url();
    tracing::debug!("Using provider {} at {base_url}", options.kind);

    let provider: Arc<dyn Provider> = match options.kind {
        ProviderKind::OpenRouter => {
            let client = client
                .with_header("http-referer", "https://github.com/parley-chat/parley")?
                .with_header("x-title", "Parley")?;
            Arc::new(OpenAiCompatProvider::new("openrouter", client, base_url))
        }
        ProviderKind::GptGod => Arc::new(OpenAiCompatProvider::new("gptgod", client, base_url)),
        ProviderKind::HuggingFace => Arc::new(HuggingFaceProvider::new(client, base_url)),
    };
    Ok(provider)
}
