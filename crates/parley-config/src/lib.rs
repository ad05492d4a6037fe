//! Multi-tier TOML configuration for Parley.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use parley_core::SelectionPolicy;
use parley_mcp::McpConfig;
use parley_providers::{ProviderKind, ProviderOptions, RetryPolicy};
use parley_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The default max tokens for a response.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Resolved configuration for a Parley session.
#[derive(Debug, Clone)]
pub struct ParleyConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub max_retries: Option<u32>,
    pub mcp: McpConfig,
    pub tools: SelectionPolicy,
    pub config_dir: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub tools: SelectionPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_retries: Option<u32>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    /// Start no tool servers at all.
    pub no_mcp: bool,
}

impl ParleyConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Config file (~/.parley/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"));
        let mut config = Self::resolve(settings, overrides, |key| std::env::var(key).ok())?;
        config.config_dir = config_dir;
        Ok(config)
    }

    /// Apply precedence to already-read sources. `env` looks up a variable.
    pub fn resolve(
        settings: SettingsFile,
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = settings.provider;

        // Provider kind is decided once, here.
        let provider = match overrides
            .provider
            .or_else(|| env("PARLEY_PROVIDER"))
            .or(file.kind)
        {
            Some(name) => name.parse::<ProviderKind>()?,
            None => ProviderKind::default(),
        };

        let model = overrides
            .model
            .or_else(|| env("PARLEY_MODEL"))
            .or(file.model)
            .unwrap_or_else(|| provider.default_model().to_string());

        let api_key = overrides
            .api_key
            .or_else(|| provider.api_key_env().iter().find_map(|key| env(key)))
            .or(file.api_key)
            .filter(|key| !key.trim().is_empty());

        let base_url = env("PARLEY_BASE_URL").or(file.base_url);

        let max_tokens = overrides
            .max_tokens
            .or(file.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        if let Some(temperature) = file.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidValue {
                    key: "provider.temperature".into(),
                    message: format!("{temperature} is outside 0.0..=2.0"),
                });
            }
        }

        let mut mcp = settings.mcp;
        if overrides.no_mcp {
            mcp.use_defaults = false;
            mcp.servers.clear();
        }

        Ok(ParleyConfig {
            provider,
            model,
            api_key,
            base_url,
            max_tokens,
            temperature: file.temperature,
            max_retries: file.max_retries,
            mcp,
            tools: settings.tools,
            config_dir: PathBuf::new(),
        })
    }

    /// Options for building the provider; fails without an API key.
    pub fn provider_options(&self) -> Result<ProviderOptions, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!(
                    "api_key for {} (set {} or add [provider] api_key to ~/.parley/config.toml)",
                    self.provider,
                    self.provider.api_key_env().join(" or ")
                ),
            })?;

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = self.max_retries {
            retry = retry.with_max_retries(max_retries);
        }
        Ok(ProviderOptions {
            kind: self.provider,
            api_key,
            base_url: self.base_url.clone(),
            retry,
        })
    }
}

/// Get the Parley config directory path (~/.parley/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PARLEY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &std::path::Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}
