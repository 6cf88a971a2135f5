//! # Credentials API
//!
//! Provider listing and per-provider key management. Secrets go in,
//! never come back out.

use axum::{
    extract::{Path, State},
    Json,
};
use prism_core::credentials::{CredentialSource, CredentialStatus};
use prism_core::Provider;
use serde::{Deserialize, Serialize};

use super::{ApiResult, SharedState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: Provider,
    pub name: &'static str,
    pub default_model: &'static str,
    pub env_var: &'static str,
    pub credential: CredentialSource,
}

#[derive(Debug, Deserialize)]
pub struct SetCredentialRequest {
    pub secret: String,
}

/// Supported providers and whether each has a usable key
pub async fn list_providers(State(state): State<SharedState>) -> Json<Vec<ProviderInfo>> {
    let credentials = state.session.engine().credentials();
    Json(
        Provider::all()
            .into_iter()
            .map(|provider| ProviderInfo {
                id: provider,
                name: provider.display_name(),
                default_model: provider.default_model(),
                env_var: provider.env_var(),
                credential: credentials.source(provider),
            })
            .collect(),
    )
}

pub async fn list_credentials(State(state): State<SharedState>) -> Json<Vec<CredentialStatus>> {
    Json(state.session.credential_status())
}

/// Save a user key; an empty secret clears it
pub async fn set_credential(
    State(state): State<SharedState>,
    Path(provider): Path<String>,
    Json(req): Json<SetCredentialRequest>,
) -> ApiResult<Vec<CredentialStatus>> {
    let provider: Provider = provider.parse()?;
    state.session.set_credential(provider, &req.secret)?;
    Ok(Json(state.session.credential_status()))
}

/// Forget the user key; resolution falls back to the override
pub async fn clear_credential(
    State(state): State<SharedState>,
    Path(provider): Path<String>,
) -> ApiResult<Vec<CredentialStatus>> {
    let provider: Provider = provider.parse()?;
    state.session.clear_credential(provider)?;
    Ok(Json(state.session.credential_status()))
}
