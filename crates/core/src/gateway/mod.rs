//! # Provider Gateway
//!
//! Uniform `invoke(provider, prompt, model?) -> text` over the supported
//! providers. The gateway normalizes request shapes, extracts the text
//! field from each provider's envelope and classifies failures.
//!
//! One outbound request per call. Retry policy belongs to the topologies,
//! never to the gateway.

pub mod envelope;
pub mod error;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::models::Provider;

pub use error::GatewayError;

/// A single provider call.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub provider: Provider,
    pub prompt: String,
    pub model_override: Option<String>,
    /// Resolved by the caller; `None` fails with `MissingCredential`.
    pub credential: Option<String>,
}

impl InvokeRequest {
    pub fn new(provider: Provider, prompt: impl Into<String>) -> Self {
        Self {
            provider,
            prompt: prompt.into(),
            model_override: None,
            credential: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// Trait seam for provider calls; executors only ever see this.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> Result<String, GatewayError>;
}

/// reqwest-backed gateway speaking each provider's native API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_urls: HashMap<Provider, String>,
    models: HashMap<Provider, String>,
    max_output_tokens: u32,
}

impl HttpGateway {
    /// Create from engine configuration (timeouts, base URLs, default models).
    pub fn from_config(config: &EngineConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(GatewayError::Transport)?;

        Ok(Self {
            client,
            base_urls: config.base_urls.clone(),
            models: config.models.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }

    /// Point one provider at a different API root (proxies, mock servers).
    pub fn with_base_url(mut self, provider: Provider, url: impl Into<String>) -> Self {
        self.base_urls.insert(provider, url.into());
        self
    }

    fn base_url(&self, provider: Provider) -> &str {
        self.base_urls
            .get(&provider)
            .map(String::as_str)
            .unwrap_or_else(|| provider.default_base_url())
    }

    /// Model: call override -> configured default -> built-in default
    fn resolve_model(&self, provider: Provider, model_override: Option<&str>) -> String {
        model_override
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.models.get(&provider).cloned())
            .unwrap_or_else(|| provider.default_model().to_string())
    }
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn invoke(&self, request: InvokeRequest) -> Result<String, GatewayError> {
        let provider = request.provider;

        if request.prompt.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("prompt is empty".to_string()));
        }

        let secret = request
            .credential
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(GatewayError::missing_credential(provider))?;

        let model = self.resolve_model(provider, request.model_override.as_deref());
        let outbound = envelope::build_request(
            provider,
            self.base_url(provider),
            &model,
            &request.prompt,
            secret,
            self.max_output_tokens,
        );

        tracing::debug!(
            provider = %provider,
            model = %model,
            prompt_chars = request.prompt.len(),
            "Invoking provider"
        );

        let mut builder = self.client.post(&outbound.url).json(&outbound.body);
        for (name, value) in &outbound.headers {
            builder = builder.header(*name, value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<Value>(&body);

        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|v| envelope::extract_error(&v))
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
                });
            let err = GatewayError::provider(provider, Some(status.as_u16()), message);
            tracing::warn!(provider = %provider, code = err.code(), status = status.as_u16(), "Provider call failed");
            return Err(err);
        }

        let value = parsed.map_err(|e| GatewayError::malformed(provider, format!("invalid JSON: {e}")))?;

        if let Some(message) = envelope::extract_error(&value) {
            return Err(GatewayError::provider(provider, Some(status.as_u16()), message));
        }

        envelope::extract_text(provider, &value)
            .ok_or_else(|| GatewayError::malformed(provider, "no text in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_resolution_order() {
        let mut config = EngineConfig::default();
        config
            .models
            .insert(Provider::OpenAI, "gpt-4o-mini".to_string());
        let gateway = HttpGateway::from_config(&config).unwrap();

        assert_eq!(
            gateway.resolve_model(Provider::OpenAI, Some("o3")),
            "o3".to_string()
        );
        assert_eq!(gateway.resolve_model(Provider::OpenAI, None), "gpt-4o-mini");
        assert_eq!(gateway.resolve_model(Provider::OpenAI, Some("  ")), "gpt-4o-mini");
        assert_eq!(
            gateway.resolve_model(Provider::Anthropic, None),
            Provider::Anthropic.default_model()
        );
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_call() {
        // Unroutable base URL: a request would fail with a transport error instead.
        let gateway = HttpGateway::from_config(&EngineConfig::default())
            .unwrap()
            .with_base_url(Provider::Gemini, "http://127.0.0.1:1");

        let err = gateway
            .invoke(InvokeRequest::new(Provider::Gemini, "hello"))
            .await
            .unwrap_err();
        assert!(err.is_missing_credential());
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let gateway = HttpGateway::from_config(&EngineConfig::default()).unwrap();
        let err = gateway
            .invoke(
                InvokeRequest::new(Provider::OpenAI, "   ").with_credential(Some("k".into())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}
