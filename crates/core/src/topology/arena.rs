//! # Arena
//!
//! Two contenders answer the same prompt concurrently. Neither failure
//! cancels the other; a failed contender shows `"Error: <message>"` in its
//! slot. The arena itself never fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    RunOutcome, RunResult, StageOutcome, StageResult, StageRunner, Topology,
    TopologyExecutor,
};
use crate::models::{ModelConfig, Provider};
use crate::prompts;

/// One side of the arena
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contender {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Persona injected ahead of the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_label: Option<String>,
}

impl Contender {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            model: None,
            role_label: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_role_label(mut self, label: impl Into<String>) -> Self {
        self.role_label = Some(label.into());
        self
    }

    pub fn binding(&self) -> ModelConfig {
        ModelConfig {
            provider: self.provider,
            model: self.model.clone(),
        }
    }

    fn prompt(&self, request: &str) -> String {
        match self.role_label.as_deref().filter(|l| !l.trim().is_empty()) {
            Some(label) => prompts::compose(&format!("You are {label}."), &[("Request", request)]),
            None => request.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArenaConfig {
    #[serde(default = "default_contender_a")]
    pub contender_a: Contender,
    #[serde(default = "default_contender_b")]
    pub contender_b: Contender,
}

fn default_contender_a() -> Contender {
    Contender::new(Provider::Gemini)
}

fn default_contender_b() -> Contender {
    Contender::new(Provider::OpenAI)
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            contender_a: default_contender_a(),
            contender_b: default_contender_b(),
        }
    }
}

/// Both sides, each either a success or a recorded failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BattleResult {
    pub contender_a: StageResult,
    pub contender_b: StageResult,
}

impl BattleResult {
    pub fn both_failed(&self) -> bool {
        !self.contender_a.succeeded && !self.contender_b.succeeded
    }
}

pub struct ArenaExecutor {
    config: ArenaConfig,
}

impl ArenaExecutor {
    pub fn new(config: ArenaConfig) -> Self {
        Self { config }
    }
}

fn settle(outcome: StageOutcome) -> StageResult {
    match outcome {
        Ok(stage) => stage,
        Err(failed) => {
            let mut stage = failed.stage;
            stage.text = format!(
                "Error: {}",
                stage.error_message.as_deref().unwrap_or("unknown error")
            );
            stage
        }
    }
}

#[async_trait]
impl TopologyExecutor for ArenaExecutor {
    fn topology(&self) -> Topology {
        Topology::Arena
    }

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome {
        let a = &self.config.contender_a;
        let b = &self.config.contender_b;
        let label_a = a.role_label.clone().unwrap_or_else(|| "contender_a".to_string());
        let label_b = b.role_label.clone().unwrap_or_else(|| "contender_b".to_string());
        let (binding_a, binding_b) = (a.binding(), b.binding());

        let (outcome_a, outcome_b) = tokio::join!(
            runner.run_stage(&binding_a, &label_a, a.prompt(prompt)),
            runner.run_stage(&binding_b, &label_b, b.prompt(prompt)),
        );

        let battle = BattleResult {
            contender_a: settle(outcome_a),
            contender_b: settle(outcome_b),
        };
        if battle.both_failed() {
            tracing::warn!("Both arena contenders failed");
        }
        Ok(RunResult::Arena(battle))
    }
}
