//! Swarm: launches a phased flow and runs its first phase. Later phases
//! are driven by the session (confirm / feedback / refine loop).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    RunFailure, RunOutcome, RunResult, StageRunner, Topology, TopologyExecutor,
};
use crate::hive::{FlowPreset, PhaseFlow, PhaseStateMachine};
use crate::models::{ModelConfig, Provider};
use crate::EngineError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwarmConfig {
    #[serde(default)]
    pub flow: FlowPreset,
    /// Provider for every role; the preset default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SwarmConfig {
    pub fn new(flow: FlowPreset) -> Self {
        Self {
            flow,
            ..Default::default()
        }
    }

    pub fn build_flow(&self) -> PhaseFlow {
        let flow = self.flow.build();
        if self.provider.is_none() && self.model.is_none() {
            return flow;
        }
        let binding = ModelConfig {
            provider: self.provider.unwrap_or_default(),
            model: self.model.clone(),
        };
        flow.with_binding(&binding)
    }
}

pub struct SwarmExecutor {
    config: SwarmConfig,
}

impl SwarmExecutor {
    pub fn new(config: SwarmConfig) -> Self {
        Self { config }
    }

    /// Build the machine and run phase 0. The machine is returned even
    /// when the first phase fails, so it can be retried.
    pub async fn launch(
        &self,
        prompt: &str,
        runner: &StageRunner,
    ) -> (PhaseStateMachine<PhaseFlow>, Result<(), EngineError>) {
        let flow = Arc::new(self.config.build_flow());
        let mut machine = PhaseStateMachine::new(flow, prompt);
        let started = machine.start(runner).await.map(|_| ());
        (machine, started)
    }
}

#[async_trait]
impl TopologyExecutor for SwarmExecutor {
    fn topology(&self) -> Topology {
        Topology::Swarm
    }

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome {
        let (machine, started) = self.launch(prompt, runner).await;
        match started {
            Ok(()) => Ok(RunResult::Swarm(machine.snapshot())),
            Err(error) => Err(RunFailure {
                error,
                partial: RunResult::Swarm(machine.snapshot()),
            }),
        }
    }
}
