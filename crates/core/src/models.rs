//! # Prism Models
//!
//! Centralized provider catalogue for the Prism engine.
//! Every topology addresses a provider call through these types; the
//! gateway owns the wire details behind them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EngineError;

/// Supported generative text providers
///
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    OpenRouter,
}

impl Provider {
    /// Get all available providers
    pub fn all() -> Vec<Provider> {
        vec![
            Provider::Gemini,
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::OpenRouter,
        ]
    }

    /// Stable lowercase id used in config files, URLs and the CLI
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    /// Environment variable holding the global default key
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Model used when neither the call nor the config names one
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.0-flash",
            Provider::OpenAI => "gpt-4o",
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::OpenRouter => "anthropic/claude-3.5-sonnet",
        }
    }

    /// Public API root for the provider
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com",
            Provider::OpenAI => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenRouter => "https://openrouter.ai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" | "gpt" => Ok(Provider::OpenAI),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(EngineError::UnknownProvider(other.to_string())),
        }
    }
}

/// Provider + model selection for a single call
///
/// Topology configs carry one of these per bound role. `model` is optional;
/// the gateway falls back to the configured or built-in default.
///
/// ## Example
/// ```rust,ignore
/// use prism_core::models::{ModelConfig, Provider};
///
/// let config = ModelConfig::new(Provider::OpenAI).with_model("gpt-4o-mini");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Provider to call
    #[serde(default)]
    pub provider: Provider,
    /// Model override (e.g., "gpt-4o", "gemini-2.0-flash")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ModelConfig {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: None,
        }
    }

    /// Pin a model for this binding
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}
