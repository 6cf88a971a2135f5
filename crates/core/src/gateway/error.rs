//! Error types for the provider gateway.

use thiserror::Error;

use crate::models::Provider;

/// Errors that can occur when calling a provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No credential resolved for the provider. Checked before any call.
    #[error("no API key configured for {provider}")]
    MissingCredential { provider: Provider },

    /// HTTP/network error (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with an error status or an error object.
    ///
    /// Displays the provider's message alone; when the body carried none,
    /// the message is the HTTP reason phrase (e.g. "Unauthorized").
    #[error("{message}")]
    Provider {
        provider: Provider,
        status: Option<u16>,
        message: String,
    },

    /// The response parsed but held no extractable text.
    #[error("malformed {provider} response: {detail}")]
    MalformedEnvelope { provider: Provider, detail: String },

    /// The request failed validation before being sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn missing_credential(provider: Provider) -> Self {
        Self::MissingCredential { provider }
    }

    pub fn provider(provider: Provider, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            status,
            message: message.into(),
        }
    }

    pub fn malformed(provider: Provider, detail: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            provider,
            detail: detail.into(),
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential { .. } => "missing_credential",
            Self::Transport(_) => "transport_error",
            Self::Provider { .. } => "provider_error",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn is_missing_credential(&self) -> bool {
        matches!(self, Self::MissingCredential { .. })
    }

    /// HTTP status reported by the provider, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => *status,
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
