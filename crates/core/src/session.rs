//! # Session
//!
//! Owns the single active run. Starting a run replaces the previous one
//! wholesale; a call that finishes after it was replaced is dropped
//! (`Superseded`) instead of merging into the newer run's state.
//!
//! Provider calls run with the state lock released, so snapshots stay
//! readable while a run is in flight.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::credentials::{
    CredentialResolver, CredentialStatus, CredentialStore, MemoryCredentialStore,
    SqliteCredentialStore,
};
use crate::events::{EventSink, RunEvent, RunEventKind};
use crate::gateway::{HttpGateway, ProviderGateway};
use crate::hive::{PhaseFlow, PhaseStateMachine};
use crate::models::Provider;
use crate::parser::ParsedOutput;
use crate::topology::{
    ExecutionRequest, RunFailure, RunResult, StageRunner, SwarmConfig, SwarmExecutor, Topology,
    TopologyConfig,
};
use crate::EngineError;

/// Shared dependencies: gateway, credentials and configuration
pub struct Engine {
    gateway: Arc<dyn ProviderGateway>,
    credentials: Arc<CredentialResolver>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        credentials: Arc<CredentialResolver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            credentials,
            config,
        }
    }

    /// HTTP gateway plus a SQLite (or in-memory) credential store, with
    /// environment overrides
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let gateway = HttpGateway::from_config(&config).context("Failed to build HTTP client")?;

        let store: Arc<dyn CredentialStore> = match &config.credentials_db {
            Some(path) => Arc::new(SqliteCredentialStore::open_at(path)?),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let credentials = CredentialResolver::new(store).with_env_overrides();

        Ok(Self::new(Arc::new(gateway), Arc::new(credentials), config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Configured defaults for a topology
    pub fn default_config(&self, topology: Topology) -> TopologyConfig {
        match topology {
            Topology::Standalone => TopologyConfig::Standalone(Default::default()),
            Topology::Chain => TopologyConfig::Chain(self.config.chain.clone()),
            Topology::Arena => TopologyConfig::Arena(self.config.arena.clone()),
            Topology::Refine => TopologyConfig::Refine(self.config.refine.clone()),
            Topology::Swarm => TopologyConfig::Swarm(SwarmConfig::default()),
        }
    }

    fn runner(&self, events: EventSink) -> StageRunner {
        StageRunner::new(self.gateway.clone(), self.credentials.clone()).with_events(events)
    }
}

/// Error as shown to the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for RunError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything the UI renders
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub run_id: Option<Uuid>,
    pub topology: Option<Topology>,
    pub loading: bool,
    pub status: String,
    pub result: Option<RunResult>,
    pub error: Option<RunError>,
    /// Phase name for swarm runs
    pub current_phase: Option<String>,
    /// Parse of the latest successful stage
    pub parsed: Option<ParsedOutput>,
}

struct SessionState {
    generation: u64,
    run_id: Option<Uuid>,
    topology: Option<Topology>,
    loading: bool,
    status: String,
    result: Option<RunResult>,
    error: Option<RunError>,
    swarm: Option<PhaseStateMachine<PhaseFlow>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            generation: 0,
            run_id: None,
            topology: None,
            loading: false,
            status: "Idle".to_string(),
            result: None,
            error: None,
            swarm: None,
        }
    }
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        let current_phase = match &self.result {
            Some(RunResult::Swarm(session)) => session.current_phase().map(|p| p.name.clone()),
            _ => None,
        };
        let parsed = self.result.as_ref().and_then(|result| {
            result
                .history()
                .iter()
                .rev()
                .find(|s| s.succeeded)
                .map(|s| s.parsed())
        });

        SessionSnapshot {
            run_id: self.run_id,
            topology: self.topology,
            loading: self.loading,
            status: self.status.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            current_phase,
            parsed,
        }
    }
}

/// Handle to the active run; cheap to clone
#[derive(Clone)]
pub struct Session {
    engine: Arc<Engine>,
    state: Arc<RwLock<SessionState>>,
    events: Option<broadcast::Sender<RunEvent>>,
}

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            state: Arc::new(RwLock::new(SessionState::default())),
            events: None,
        }
    }

    /// Broadcast run events to subscribers
    pub fn with_events(mut self, tx: broadcast::Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<RunEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    /// Latest finalized text of the active run
    pub async fn latest_artifact(&self) -> Option<String> {
        self.state
            .read()
            .await
            .result
            .as_ref()
            .and_then(RunResult::artifact)
    }

    /// Replace the active run and execute the new one.
    ///
    /// Provider failures end up in the snapshot's `error`; only a run that
    /// was replaced mid-flight returns `Err(Superseded)`.
    pub async fn start_run(&self, request: ExecutionRequest) -> Result<SessionSnapshot, EngineError> {
        let topology = request.topology();
        let run_id = Uuid::new_v4();
        let generation = {
            let mut state = self.state.write().await;
            let generation = state.generation + 1;
            *state = SessionState {
                generation,
                run_id: Some(run_id),
                topology: Some(topology),
                loading: true,
                status: format!("Running {topology}..."),
                ..SessionState::default()
            };
            state.generation
        };

        let sink = EventSink::new(run_id, self.events.clone());
        sink.emit(
            sink.event(RunEventKind::RunStarted)
                .with_data(serde_json::json!({ "topology": topology })),
        );
        tracing::info!(run_id = %run_id, topology = %topology, "Run started");

        let runner = self.engine.runner(sink.clone());
        let (outcome, machine) = match request.config() {
            TopologyConfig::Swarm(config) => {
                let (machine, started) = SwarmExecutor::new(config.clone())
                    .launch(request.prompt_text(), &runner)
                    .await;
                let snapshot = RunResult::Swarm(machine.snapshot());
                let outcome = match started {
                    Ok(()) => Ok(snapshot),
                    Err(error) => Err(RunFailure {
                        error,
                        partial: snapshot,
                    }),
                };
                (outcome, Some(machine))
            }
            _ => (request.run(&runner).await, None),
        };

        let mut state = self.state.write().await;
        if state.generation != generation {
            tracing::info!(run_id = %run_id, "Run superseded, result dropped");
            return Err(EngineError::Superseded);
        }

        state.loading = false;
        state.swarm = machine;
        match outcome {
            Ok(result) => {
                state.status = "Done".to_string();
                state.result = Some(result);
                sink.emit(sink.event(RunEventKind::RunCompleted));
                tracing::info!(run_id = %run_id, "Run completed");
            }
            Err(failure) => {
                state.status = format!("Failed: {}", failure.error);
                state.error = Some(RunError::from(&failure.error));
                state.result = Some(failure.partial);
                sink.emit(
                    sink.event(RunEventKind::RunFailed)
                        .with_data(serde_json::json!({ "error": failure.error.to_string() })),
                );
                tracing::warn!(
                    run_id = %run_id,
                    code = failure.error.code(),
                    "Run failed: {}",
                    failure.error
                );
            }
        }
        Ok(state.snapshot())
    }

    /// Advance the swarm with a choice; `None` or blank means auto-pilot
    pub async fn confirm(&self, choice: Option<String>) -> Result<SessionSnapshot, EngineError> {
        self.phase_action("Advancing", move |mut machine, runner| async move {
            let outcome = machine
                .advance(choice.as_deref(), &runner)
                .await
                .map(|_| format!("Phase {} ready", machine.current_phase().name));
            (machine, outcome)
        })
        .await
    }

    /// Route free-text feedback through the manager
    pub async fn feedback(&self, text: String) -> Result<SessionSnapshot, EngineError> {
        self.phase_action("Consulting manager", move |mut machine, runner| async move {
            let outcome = machine
                .pivot(&text, &runner)
                .await
                .map(|directive| directive.reply_text);
            (machine, outcome)
        })
        .await
    }

    /// Re-enter a phase at or before the current one
    pub async fn refine_loop(
        &self,
        phase_index: usize,
        instruction: String,
    ) -> Result<SessionSnapshot, EngineError> {
        self.phase_action("Refining", move |mut machine, runner| async move {
            let outcome = machine
                .refine_loop(phase_index, &instruction, &runner)
                .await
                .map(|_| format!("Phase {} refined", machine.current_phase().name));
            (machine, outcome)
        })
        .await
    }

    /// Run one action against a copy of the swarm machine and commit it if
    /// no newer run or action replaced it meanwhile.
    ///
    /// Gateway failures are committed (the failed call is in history) and
    /// reported in the snapshot; any other error leaves state untouched.
    async fn phase_action<A, Fut>(
        &self,
        label: &str,
        action: A,
    ) -> Result<SessionSnapshot, EngineError>
    where
        A: FnOnce(PhaseStateMachine<PhaseFlow>, StageRunner) -> Fut,
        Fut: Future<Output = (PhaseStateMachine<PhaseFlow>, Result<String, EngineError>)>,
    {
        let (machine, run_id, generation, previous_status) = {
            let mut state = self.state.write().await;
            let machine = state.swarm.clone().ok_or(EngineError::NoActiveSwarm)?;
            let run_id = state.run_id.unwrap_or_else(Uuid::new_v4);
            state.generation += 1;
            state.loading = true;
            let previous_status = std::mem::replace(&mut state.status, format!("{label}..."));
            (machine, run_id, state.generation, previous_status)
        };

        let sink = EventSink::new(run_id, self.events.clone());
        let (machine, outcome) = action(machine, self.engine.runner(sink.clone())).await;

        let mut state = self.state.write().await;
        if state.generation != generation {
            return Err(EngineError::Superseded);
        }
        state.loading = false;

        match outcome {
            Ok(status) => {
                state.status = status;
                state.error = None;
                sink.emit(sink.event(RunEventKind::RunCompleted));
            }
            Err(error @ EngineError::Gateway(_)) => {
                state.status = format!("Failed: {error}");
                state.error = Some(RunError::from(&error));
                sink.emit(
                    sink.event(RunEventKind::RunFailed)
                        .with_data(serde_json::json!({ "error": error.to_string() })),
                );
                tracing::warn!(run_id = %run_id, "Phase action failed: {}", error);
            }
            Err(error) => {
                state.status = previous_status;
                return Err(error);
            }
        }

        state.result = Some(RunResult::Swarm(machine.snapshot()));
        state.swarm = Some(machine);
        Ok(state.snapshot())
    }

    pub fn set_credential(&self, provider: Provider, secret: &str) -> Result<(), EngineError> {
        self.engine.credentials.set(provider, secret)
    }

    pub fn clear_credential(&self, provider: Provider) -> Result<(), EngineError> {
        self.engine.credentials.clear(provider)
    }

    pub fn credential_status(&self) -> Vec<CredentialStatus> {
        self.engine.credentials.status()
    }
}
