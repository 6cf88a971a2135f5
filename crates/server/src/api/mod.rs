//! # HTTP API
//!
//! JSON endpoints under `/api/v1` plus the run event stream.

pub mod credentials;
pub mod runs;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use prism_core::{EngineError, RunEvent, Session};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application state
pub struct AppState {
    pub session: Session,
    pub event_tx: broadcast::Sender<RunEvent>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(session: Session, event_tx: broadcast::Sender<RunEvent>) -> SharedState {
        Arc::new(Self { session, event_tx })
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Engine error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::InvalidRequest(_)
            | EngineError::UnknownProvider(_)
            | EngineError::InvalidPhase { .. } => StatusCode::BAD_REQUEST,
            EngineError::NoActiveSwarm
            | EngineError::AlreadyTerminal
            | EngineError::Superseded => StatusCode::CONFLICT,
            EngineError::Gateway(_) | EngineError::AllStagesFailed => StatusCode::BAD_GATEWAY,
            EngineError::Credentials(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), "Request failed: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn routes(state: SharedState) -> Router {
    let run_routes = Router::new()
        .route("/", post(runs::start_run))
        .route("/current", get(runs::current_run))
        .route("/current/artifact", get(runs::current_artifact))
        .route("/current/confirm", post(runs::confirm))
        .route("/current/feedback", post(runs::feedback))
        .route("/current/refine", post(runs::refine_loop))
        .route("/events", get(runs::events));

    let credential_routes = Router::new()
        .route("/", get(credentials::list_credentials))
        .route(
            "/:provider",
            put(credentials::set_credential).delete(credentials::clear_credential),
        );

    Router::new()
        .nest("/api/v1/runs", run_routes)
        .nest("/api/v1/credentials", credential_routes)
        .route("/api/v1/providers", get(credentials::list_providers))
        .with_state(state)
}
