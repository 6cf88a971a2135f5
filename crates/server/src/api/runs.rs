//! # Runs API
//!
//! Start a run, drive the active swarm and stream run events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use prism_core::{EngineError, ExecutionRequest, SessionSnapshot, Topology, TopologyConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;

use super::{ApiResult, SharedState};

/// Request to start a run
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub prompt: String,
    pub topology: Topology,
    /// Topology settings; configured defaults when absent
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmRequest {
    /// Empty or missing means auto-pilot
    #[serde(default)]
    pub choice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    pub phase_index: usize,
    pub instruction: String,
}

#[derive(Debug, Serialize)]
pub struct ArtifactResponse {
    pub artifact: Option<String>,
}

/// Merge the topology tag into the client's settings object
pub fn topology_config(
    topology: Topology,
    config: Option<Value>,
    defaults: impl FnOnce(Topology) -> TopologyConfig,
) -> Result<TopologyConfig, EngineError> {
    let Some(value) = config else {
        return Ok(defaults(topology));
    };
    let Value::Object(mut fields) = value else {
        return Err(EngineError::InvalidRequest(
            "config must be a JSON object".to_string(),
        ));
    };
    fields.insert("topology".to_string(), Value::String(topology.id().to_string()));
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| EngineError::InvalidRequest(format!("invalid {topology} config: {e}")))
}

/// Start a run, replacing the active one
pub async fn start_run(
    State(state): State<SharedState>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult<SessionSnapshot> {
    let engine = state.session.engine();
    let config = topology_config(req.topology, req.config, |t| engine.default_config(t))?;
    let request = ExecutionRequest::new(req.prompt, config)?;

    let snapshot = state.session.start_run(request).await?;
    Ok(Json(snapshot))
}

pub async fn current_run(State(state): State<SharedState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

/// Latest finalized text, for the client to persist
pub async fn current_artifact(State(state): State<SharedState>) -> Json<ArtifactResponse> {
    Json(ArtifactResponse {
        artifact: state.session.latest_artifact().await,
    })
}

pub async fn confirm(
    State(state): State<SharedState>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.session.confirm(req.choice).await?))
}

pub async fn feedback(
    State(state): State<SharedState>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(state.session.feedback(req.text).await?))
}

pub async fn refine_loop(
    State(state): State<SharedState>,
    Json(req): Json<RefineRequest>,
) -> ApiResult<SessionSnapshot> {
    Ok(Json(
        state
            .session
            .refine_loop(req.phase_index, req.instruction)
            .await?,
    ))
}

/// SSE endpoint for run events with heartbeat
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(json)), rx));
                }
                // Slow client; skip what it missed
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                    tracing::debug!("Event stream lagged by {} events", n);
                    continue;
                }
                Ok(Err(_)) => return None,
                Err(_) => return Some((Ok(Event::default().comment("heartbeat")), rx)),
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::topology::{ChainConfig, FocusDimension};
    use serde_json::json;

    fn defaults(topology: Topology) -> TopologyConfig {
        match topology {
            Topology::Chain => TopologyConfig::Chain(ChainConfig::default()),
            other => panic!("unexpected default lookup for {other}"),
        }
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = topology_config(Topology::Chain, None, defaults).unwrap();
        assert_eq!(config, TopologyConfig::Chain(ChainConfig::default()));
    }

    #[test]
    fn test_config_object_tagged_with_topology() {
        let config = topology_config(
            Topology::Refine,
            Some(json!({ "focus": "security" })),
            defaults,
        )
        .unwrap();
        match config {
            TopologyConfig::Refine(refine) => assert_eq!(refine.focus, FocusDimension::Security),
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_config_rejected() {
        let err = topology_config(Topology::Arena, Some(json!([1, 2])), defaults).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_request_body_shape() {
        let req: StartRunRequest = serde_json::from_value(json!({
            "prompt": "Explain TCP handshake",
            "topology": "chain"
        }))
        .unwrap();
        assert_eq!(req.topology, Topology::Chain);
        assert!(req.config.is_none());
    }
}
