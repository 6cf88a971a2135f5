//! # Credential Resolver
//!
//! Per-provider key lookup with precedence:
//!
//! ```text
//! user-set value (CredentialStore) -> session override (env/global) -> none
//! ```
//!
//! A missing credential is not an error here; it only fails when a
//! topology tries to call the provider.

pub mod sqlite;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::Provider;
use crate::EngineError;

pub use sqlite::SqliteCredentialStore;

/// Persistence for user-set credentials
pub trait CredentialStore: Send + Sync {
    /// Previously saved user value, if any
    fn load(&self, provider: Provider) -> Result<Option<String>>;
    /// Save (replace) the user value
    fn save(&self, provider: Provider, secret: &str) -> Result<()>;
    /// Forget the user value
    fn remove(&self, provider: Provider) -> Result<()>;
}

/// Process-local store; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<Provider, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, provider: Provider) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(secrets.get(&provider).cloned())
    }

    fn save(&self, provider: Provider, secret: &str) -> Result<()> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        secrets.insert(provider, secret.to_string());
        Ok(())
    }

    fn remove(&self, provider: Provider) -> Result<()> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        secrets.remove(&provider);
        Ok(())
    }
}

/// Where a resolved credential came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    User,
    Override,
    None,
}

/// Secret-free view for the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub provider: Provider,
    pub source: CredentialSource,
}

/// Resolves the key to use for each provider call
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    overrides: HashMap<Provider, String>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            overrides: HashMap::new(),
        }
    }

    /// Resolver over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()))
    }

    /// Global default for a provider, used until the user sets a value
    pub fn with_override(mut self, provider: Provider, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.trim().is_empty() {
            self.overrides.insert(provider, secret);
        }
        self
    }

    /// Read overrides from each provider's environment variable
    pub fn with_env_overrides(mut self) -> Self {
        for provider in Provider::all() {
            if let Ok(secret) = std::env::var(provider.env_var()) {
                if !secret.trim().is_empty() {
                    tracing::debug!(provider = %provider, "Credential override loaded from environment");
                    self.overrides.insert(provider, secret);
                }
            }
        }
        self
    }

    fn user_value(&self, provider: Provider) -> Option<String> {
        match self.store.load(provider) {
            Ok(value) => value.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                tracing::warn!(provider = %provider, "Failed to read credential store: {}", e);
                None
            }
        }
    }

    /// Resolve: user value, else override, else nothing
    pub fn get(&self, provider: Provider) -> Option<String> {
        self.user_value(provider)
            .or_else(|| self.overrides.get(&provider).cloned())
    }

    /// Persist a user value; an empty secret clears instead
    pub fn set(&self, provider: Provider, secret: &str) -> Result<(), EngineError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return self.clear(provider);
        }
        self.store
            .save(provider, secret)
            .map_err(|e| EngineError::Credentials(e.to_string()))?;
        tracing::info!(provider = %provider, "Credential updated");
        Ok(())
    }

    /// Remove the user value; resolution reverts to the override (or none)
    pub fn clear(&self, provider: Provider) -> Result<(), EngineError> {
        self.store
            .remove(provider)
            .map_err(|e| EngineError::Credentials(e.to_string()))?;
        tracing::info!(provider = %provider, "Credential cleared");
        Ok(())
    }

    pub fn source(&self, provider: Provider) -> CredentialSource {
        if self.user_value(provider).is_some() {
            CredentialSource::User
        } else if self.overrides.contains_key(&provider) {
            CredentialSource::Override
        } else {
            CredentialSource::None
        }
    }

    /// Status for every provider, without secrets
    pub fn status(&self) -> Vec<CredentialStatus> {
        Provider::all()
            .into_iter()
            .map(|provider| CredentialStatus {
                provider,
                source: self.source(provider),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_used_until_user_sets_value() {
        let resolver =
            CredentialResolver::in_memory().with_override(Provider::OpenAI, "global-key");

        assert_eq!(resolver.get(Provider::OpenAI).as_deref(), Some("global-key"));
        assert_eq!(resolver.source(Provider::OpenAI), CredentialSource::Override);

        resolver.set(Provider::OpenAI, "user-key").unwrap();
        assert_eq!(resolver.get(Provider::OpenAI).as_deref(), Some("user-key"));
        assert_eq!(resolver.source(Provider::OpenAI), CredentialSource::User);
    }

    #[test]
    fn test_clear_reverts_to_override_or_empty() {
        let resolver =
            CredentialResolver::in_memory().with_override(Provider::Gemini, "global-key");
        resolver.set(Provider::Gemini, "user-key").unwrap();
        resolver.set(Provider::Anthropic, "user-anthropic").unwrap();

        resolver.clear(Provider::Gemini).unwrap();
        resolver.clear(Provider::Anthropic).unwrap();

        assert_eq!(resolver.get(Provider::Gemini).as_deref(), Some("global-key"));
        assert_eq!(resolver.get(Provider::Anthropic), None);
    }

    #[test]
    fn test_missing_credential_is_not_an_error() {
        let resolver = CredentialResolver::in_memory();
        assert_eq!(resolver.get(Provider::OpenRouter), None);
        assert_eq!(resolver.source(Provider::OpenRouter), CredentialSource::None);
    }

    #[test]
    fn test_empty_set_clears() {
        let resolver = CredentialResolver::in_memory();
        resolver.set(Provider::OpenAI, "k").unwrap();
        resolver.set(Provider::OpenAI, "   ").unwrap();
        assert_eq!(resolver.get(Provider::OpenAI), None);
    }

    #[test]
    fn test_status_never_includes_secret() {
        let resolver = CredentialResolver::in_memory().with_override(Provider::OpenAI, "sk-123");
        let json = serde_json::to_string(&resolver.status()).unwrap();
        assert!(!json.contains("sk-123"));
        assert!(json.contains("override"));
    }
}
