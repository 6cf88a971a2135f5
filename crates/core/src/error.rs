//! Engine-level error type.
//!
//! Provider call failures are classified by [`GatewayError`]; everything
//! the orchestration layer itself can reject lives here.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by executors, the phase machine and the session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A provider call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The request was rejected before any provider call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider id outside the supported set.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Every chain stage failed, so there is no output to surface.
    #[error("every chain stage failed")]
    AllStagesFailed,

    /// Advance was requested from the final phase.
    #[error("the run is already at its final phase")]
    AlreadyTerminal,

    /// A phase index outside the flow (or ahead of the current phase).
    #[error("phase {index} is not reachable (flow has {len} phases)")]
    InvalidPhase { index: usize, len: usize },

    /// A phase action arrived while no swarm run is active.
    #[error("no swarm run is active")]
    NoActiveSwarm,

    /// A newer run or action replaced this one before it finished.
    #[error("a newer run replaced this one")]
    Superseded,

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    Credentials(String),
}

impl EngineError {
    /// Short code for logs and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.code(),
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::AllStagesFailed => "all_stages_failed",
            Self::AlreadyTerminal => "already_terminal",
            Self::InvalidPhase { .. } => "invalid_phase",
            Self::NoActiveSwarm => "no_active_swarm",
            Self::Superseded => "superseded",
            Self::Credentials(_) => "credentials",
        }
    }
}
