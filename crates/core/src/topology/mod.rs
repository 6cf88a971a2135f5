//! # Topology Executors
//!
//! Five interchangeable execution strategies built on the gateway.
//!
//! ```text
//! Standalone  one call, error surfaced verbatim
//! Chain       draft → reason → condense → polish, failed stages skipped
//! Arena       two contenders in parallel, settle-all
//! Refine      draft → critique → polish, abort on first failure
//! Swarm       phased multi-agent state machine (see `hive`)
//! ```
//!
//! Every executor takes an immutable [`ExecutionRequest`] and a
//! [`StageRunner`] and returns a [`RunOutcome`].

pub mod arena;
pub mod chain;
pub mod refine;
pub mod standalone;
pub mod swarm;

#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::credentials::CredentialResolver;
use crate::events::{EventSink, RunEventKind};
use crate::gateway::{GatewayError, InvokeRequest, ProviderGateway};
use crate::models::{ModelConfig, Provider};
use crate::parser::{parse_output, ParsedOutput};
use crate::EngineError;

pub use arena::{ArenaConfig, ArenaExecutor, BattleResult, Contender};
pub use chain::{ChainConfig, ChainExecutor, ChainRole, PipelineRun};
pub use refine::{FocusDimension, RefineConfig, RefineExecutor, RefineSession};
pub use standalone::{StandaloneConfig, StandaloneExecutor};
pub use swarm::{SwarmConfig, SwarmExecutor};

/// The five execution strategies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Standalone,
    Chain,
    Arena,
    Refine,
    Swarm,
}

impl Topology {
    pub fn all() -> Vec<Topology> {
        vec![
            Topology::Standalone,
            Topology::Chain,
            Topology::Arena,
            Topology::Refine,
            Topology::Swarm,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Topology::Standalone => "standalone",
            Topology::Chain => "chain",
            Topology::Arena => "arena",
            Topology::Refine => "refine",
            Topology::Swarm => "swarm",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Topology {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topology::all()
            .into_iter()
            .find(|t| t.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::InvalidRequest(format!("unknown topology: {s}")))
    }
}

/// Topology choice plus its configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "topology", rename_all = "lowercase")]
pub enum TopologyConfig {
    Standalone(StandaloneConfig),
    Chain(ChainConfig),
    Arena(ArenaConfig),
    Refine(RefineConfig),
    Swarm(SwarmConfig),
}

impl TopologyConfig {
    pub fn topology(&self) -> Topology {
        match self {
            Self::Standalone(_) => Topology::Standalone,
            Self::Chain(_) => Topology::Chain,
            Self::Arena(_) => Topology::Arena,
            Self::Refine(_) => Topology::Refine,
            Self::Swarm(_) => Topology::Swarm,
        }
    }

    /// Strategy object for this configuration
    pub fn executor(&self) -> Box<dyn TopologyExecutor> {
        match self {
            Self::Standalone(c) => Box::new(StandaloneExecutor::new(c.clone())),
            Self::Chain(c) => Box::new(ChainExecutor::new(c.clone())),
            Self::Arena(c) => Box::new(ArenaExecutor::new(c.clone())),
            Self::Refine(c) => Box::new(RefineExecutor::new(c.clone())),
            Self::Swarm(c) => Box::new(SwarmExecutor::new(c.clone())),
        }
    }
}

/// One run invocation; immutable for the run's lifetime
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    prompt_text: String,
    config: TopologyConfig,
}

impl ExecutionRequest {
    pub fn new(prompt_text: impl Into<String>, config: TopologyConfig) -> Result<Self, EngineError> {
        let prompt_text = prompt_text.into();
        if prompt_text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("prompt is empty".to_string()));
        }
        Ok(Self {
            prompt_text,
            config,
        })
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn topology(&self) -> Topology {
        self.config.topology()
    }

    /// Execute with the strategy this request's config describes
    pub async fn run(&self, runner: &StageRunner) -> RunOutcome {
        self.config.executor().execute(&self.prompt_text, runner).await
    }
}

/// Outcome of one gateway call made by an executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub provider: Provider,
    pub role_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub text: String,
    pub succeeded: bool,
    /// Always present and non-empty when `succeeded` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn success(
        binding: &ModelConfig,
        role_label: impl Into<String>,
        text: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: binding.provider,
            role_label: role_label.into(),
            model: binding.model.clone(),
            text: text.into(),
            succeeded: true,
            error_message: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(
        binding: &ModelConfig,
        role_label: impl Into<String>,
        error_message: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut message: String = error_message.into();
        if message.trim().is_empty() {
            message = "unknown error".to_string();
        }
        Self {
            provider: binding.provider,
            role_label: role_label.into(),
            model: binding.model.clone(),
            text: String::new(),
            succeeded: false,
            error_message: Some(message),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn parsed(&self) -> ParsedOutput {
        parse_output(&self.text)
    }
}

/// A failed stage together with its classified cause
#[derive(Debug)]
pub struct StageError {
    pub stage: StageResult,
    pub source: GatewayError,
}

/// Chain results
pub type StageOutcome = Result<StageResult, StageError>;

/// Resolves credentials and drives one gateway call per stage
#[derive(Clone)]
pub struct StageRunner {
    gateway: Arc<dyn ProviderGateway>,
    credentials: Arc<CredentialResolver>,
    events: EventSink,
}

impl StageRunner {
    pub fn new(gateway: Arc<dyn ProviderGateway>, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            gateway,
            credentials,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Run one stage; failures come back as a recorded `StageResult`
    pub async fn run_stage(
        &self,
        binding: &ModelConfig,
        role_label: &str,
        prompt: String,
    ) -> StageOutcome {
        let started_at = Utc::now();
        let provider = binding.provider;

        self.events.emit(
            self.events
                .event(RunEventKind::StageStarted)
                .with_role(role_label)
                .with_data(serde_json::json!({ "provider": provider })),
        );

        // Missing credential is a precondition; no request goes out.
        let result = match self.credentials.get(provider) {
            None => Err(GatewayError::missing_credential(provider)),
            Some(secret) => {
                let request = InvokeRequest::new(provider, prompt)
                    .with_model(binding.model.clone())
                    .with_credential(Some(secret));
                self.gateway.invoke(request).await
            }
        };

        match result {
            Ok(text) => {
                self.events.emit(
                    self.events
                        .event(RunEventKind::StageCompleted)
                        .with_role(role_label)
                        .with_data(serde_json::json!({ "provider": provider, "chars": text.len() })),
                );
                Ok(StageResult::success(binding, role_label, text, started_at))
            }
            Err(source) => {
                tracing::warn!(
                    provider = %provider,
                    role = role_label,
                    code = source.code(),
                    "Stage failed: {}",
                    source
                );
                self.events.emit(
                    self.events
                        .event(RunEventKind::StageFailed)
                        .with_role(role_label)
                        .with_data(serde_json::json!({ "provider": provider, "error": source.to_string() })),
                );
                Err(StageError {
                    stage: StageResult::failure(binding, role_label, source.to_string(), started_at),
                    source,
                })
            }
        }
    }
}

/// Final state of a run, one variant per topology
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "topology", content = "result", rename_all = "lowercase")]
pub enum RunResult {
    Standalone(StageResult),
    Chain(PipelineRun),
    Arena(BattleResult),
    Refine(RefineSession),
    Swarm(crate::hive::SwarmSession),
}

impl RunResult {
    pub fn topology(&self) -> Topology {
        match self {
            Self::Standalone(_) => Topology::Standalone,
            Self::Chain(_) => Topology::Chain,
            Self::Arena(_) => Topology::Arena,
            Self::Refine(_) => Topology::Refine,
            Self::Swarm(_) => Topology::Swarm,
        }
    }

    /// Ordered stage history
    pub fn history(&self) -> Vec<StageResult> {
        match self {
            Self::Standalone(stage) => vec![stage.clone()],
            Self::Chain(run) => run.stages.clone(),
            Self::Arena(battle) => vec![battle.contender_a.clone(), battle.contender_b.clone()],
            Self::Refine(session) => session.stages().into_iter().cloned().collect(),
            Self::Swarm(session) => session.history.clone(),
        }
    }

    /// Latest finalized text, for the surrounding app to persist
    pub fn artifact(&self) -> Option<String> {
        match self {
            Self::Standalone(stage) => stage.succeeded.then(|| stage.text.clone()),
            Self::Chain(run) => run.final_output().map(str::to_string),
            Self::Arena(_) => None,
            Self::Refine(session) => session.final_text().map(str::to_string),
            Self::Swarm(session) => session
                .deliverable
                .clone()
                .or_else(|| session.latest_output().map(str::to_string)),
        }
    }
}

/// Run that ended early; `partial` keeps whatever completed
#[derive(Debug)]
pub struct RunFailure {
    pub error: EngineError,
    pub partial: RunResult,
}

pub type RunOutcome = Result<RunResult, RunFailure>;

/// One execution strategy, built from a [`TopologyConfig`] which it owns.
/// The prompt is the only per-run input.
#[async_trait]
pub trait TopologyExecutor: Send + Sync {
    fn topology(&self) -> Topology;

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome;
}
