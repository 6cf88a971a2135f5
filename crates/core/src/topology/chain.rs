//! # Chain
//!
//! Four fixed stages, each fed the previous stage's output:
//!
//! ```text
//! draft (gemini) → reason (openai) → condense (anthropic) → polish (openrouter)
//! ```
//!
//! A failed stage is recorded and skipped; the next stage receives the last
//! successful output (the original prompt when nothing succeeded yet).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    RunFailure, RunOutcome, RunResult, StageResult, StageRunner, Topology,
    TopologyExecutor,
};
use crate::models::{ModelConfig, Provider};
use crate::prompts;
use crate::EngineError;

/// Role of a chain stage, in execution order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Draft,
    Reason,
    Condense,
    Polish,
}

impl ChainRole {
    pub fn label(&self) -> &'static str {
        match self {
            ChainRole::Draft => "drafter",
            ChainRole::Reason => "reasoner",
            ChainRole::Condense => "condenser",
            ChainRole::Polish => "polisher",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            ChainRole::Draft => prompts::CHAIN_DRAFT,
            ChainRole::Reason => prompts::CHAIN_REASON,
            ChainRole::Condense => prompts::CHAIN_CONDENSE,
            ChainRole::Polish => prompts::CHAIN_POLISH,
        }
    }

    fn input_heading(&self) -> &'static str {
        match self {
            ChainRole::Draft => "Request",
            _ => "Text to work on",
        }
    }
}

/// Provider binding per chain stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(default = "default_draft")]
    pub draft: ModelConfig,
    #[serde(default = "default_reason")]
    pub reason: ModelConfig,
    #[serde(default = "default_condense")]
    pub condense: ModelConfig,
    #[serde(default = "default_polish")]
    pub polish: ModelConfig,
}

fn default_draft() -> ModelConfig {
    ModelConfig::new(Provider::Gemini)
}

fn default_reason() -> ModelConfig {
    ModelConfig::new(Provider::OpenAI)
}

fn default_condense() -> ModelConfig {
    ModelConfig::new(Provider::Anthropic)
}

fn default_polish() -> ModelConfig {
    ModelConfig::new(Provider::OpenRouter)
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            draft: default_draft(),
            reason: default_reason(),
            condense: default_condense(),
            polish: default_polish(),
        }
    }
}

impl ChainConfig {
    /// Stages in execution order
    pub fn stages(&self) -> [(ChainRole, &ModelConfig); 4] {
        [
            (ChainRole::Draft, &self.draft),
            (ChainRole::Reason, &self.reason),
            (ChainRole::Condense, &self.condense),
            (ChainRole::Polish, &self.polish),
        ]
    }
}

/// Ordered stage results plus the index of the surfaced output
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub stages: Vec<StageResult>,
    /// Last successful stage
    pub final_index: Option<usize>,
}

impl PipelineRun {
    pub fn final_output(&self) -> Option<&str> {
        self.final_index
            .and_then(|i| self.stages.get(i))
            .map(|s| s.text.as_str())
    }

    pub fn failed_stages(&self) -> usize {
        self.stages.iter().filter(|s| !s.succeeded).count()
    }
}

pub struct ChainExecutor {
    config: ChainConfig,
}

impl ChainExecutor {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TopologyExecutor for ChainExecutor {
    fn topology(&self) -> Topology {
        Topology::Chain
    }

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome {
        let mut run = PipelineRun::default();
        let mut carry = prompt.to_string();

        for (index, (role, binding)) in self.config.stages().into_iter().enumerate() {
            let prompt =
                prompts::compose(role.instructions(), &[(role.input_heading(), carry.as_str())]);

            match runner.run_stage(binding, role.label(), prompt).await {
                Ok(stage) => {
                    carry = stage.text.clone();
                    run.final_index = Some(index);
                    run.stages.push(stage);
                }
                Err(failed) => {
                    tracing::warn!(
                        stage = role.label(),
                        "Chain stage skipped, forwarding previous output"
                    );
                    run.stages.push(failed.stage);
                }
            }
        }

        if run.final_index.is_none() {
            return Err(RunFailure {
                error: EngineError::AllStagesFailed,
                partial: RunResult::Chain(run),
            });
        }

        tracing::info!(failed = run.failed_stages(), "Chain finished");
        Ok(RunResult::Chain(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::test_support::{runner, ScriptedGateway};
    use std::sync::Arc;

    const PROMPT: &str = "Explain ownership";

    #[tokio::test]
    async fn test_each_stage_feeds_the_next() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "DRAFT")
                .reply(Provider::OpenAI, "REASONED")
                .reply(Provider::Anthropic, "CONDENSED")
                .reply(Provider::OpenRouter, "POLISHED"),
        );

        let result = ChainExecutor::new(ChainConfig::default())
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap();

        assert!(gateway.prompts_for(Provider::Gemini)[0].contains("Explain ownership"));
        assert!(gateway.prompts_for(Provider::OpenAI)[0].contains("DRAFT"));
        assert!(!gateway.prompts_for(Provider::OpenAI)[0].contains("Explain ownership"));
        assert!(gateway.prompts_for(Provider::Anthropic)[0].contains("REASONED"));
        assert!(gateway.prompts_for(Provider::OpenRouter)[0].contains("CONDENSED"));
        assert_eq!(result.artifact().as_deref(), Some("POLISHED"));
        assert_eq!(result.history().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_stage_is_skipped() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "DRAFT")
                .fail(Provider::OpenAI, 429, "Rate limited")
                .reply(Provider::Anthropic, "CONDENSED")
                .reply(Provider::OpenRouter, "POLISHED"),
        );

        let result = ChainExecutor::new(ChainConfig::default())
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap();

        // Condense works on the draft since reasoning failed
        assert!(gateway.prompts_for(Provider::Anthropic)[0].contains("DRAFT"));

        let RunResult::Chain(run) = result else {
            panic!("expected chain result");
        };
        assert_eq!(run.stages.len(), 4);
        assert!(!run.stages[1].succeeded);
        assert_eq!(run.stages[1].error_message.as_deref(), Some("Rate limited"));
        assert_eq!(run.final_output(), Some("POLISHED"));
        assert_eq!(run.failed_stages(), 1);
    }

    #[tokio::test]
    async fn test_last_success_is_surfaced() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "DRAFT")
                .reply(Provider::OpenAI, "REASONED")
                .fail(Provider::Anthropic, 500, "boom")
                .fail(Provider::OpenRouter, 502, "bad gateway"),
        );

        let result = ChainExecutor::new(ChainConfig::default())
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap();

        assert_eq!(result.artifact().as_deref(), Some("REASONED"));
        assert!(gateway.prompts_for(Provider::OpenRouter)[0].contains("REASONED"));
    }

    #[tokio::test]
    async fn test_first_stage_failure_forwards_original_prompt() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .fail(Provider::Gemini, 503, "overloaded")
                .reply(Provider::OpenAI, "REASONED"),
        );

        ChainExecutor::new(ChainConfig::default())
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap();

        assert!(gateway.prompts_for(Provider::OpenAI)[0].contains("Explain ownership"));
    }

    #[tokio::test]
    async fn test_output_never_regresses_for_any_later_failures() {
        let later = [
            (Provider::OpenAI, "REASONED"),
            (Provider::Anthropic, "CONDENSED"),
            (Provider::OpenRouter, "POLISHED"),
        ];

        for mask in 0u8..8 {
            let failing = |i: usize| mask & (1 << i) != 0;
            let gateway = later.iter().enumerate().fold(
                ScriptedGateway::new().reply(Provider::Gemini, "DRAFT"),
                |g, (i, (provider, text))| {
                    if failing(i) {
                        g.fail(*provider, 500, "down")
                    } else {
                        g.reply(*provider, text)
                    }
                },
            );
            let gateway = Arc::new(gateway);

            let result = ChainExecutor::new(ChainConfig::default())
                .execute(PROMPT, &runner(&gateway))
                .await
                .unwrap();

            let mut expected = "DRAFT";
            for (i, (provider, text)) in later.iter().enumerate() {
                let input = &gateway.prompts_for(*provider)[0];
                assert!(input.contains(expected), "mask {mask:03b}: stage {} input", i + 2);
                if !failing(i) {
                    expected = *text;
                }
            }
            assert_eq!(result.artifact().as_deref(), Some(expected), "mask {mask:03b}");
            let RunResult::Chain(run) = result else {
                panic!("expected chain result");
            };
            assert_eq!(run.failed_stages(), mask.count_ones() as usize);
        }
    }

    #[tokio::test]
    async fn test_all_stages_failed() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .fail(Provider::Gemini, 500, "a")
                .fail(Provider::OpenAI, 500, "b")
                .fail(Provider::Anthropic, 500, "c")
                .fail(Provider::OpenRouter, 500, "d"),
        );

        let failure = ChainExecutor::new(ChainConfig::default())
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, EngineError::AllStagesFailed));
        let history = failure.partial.history();
        assert_eq!(history.len(), 4);
        assert!(history.iter().all(|s| !s.succeeded && s.error_message.is_some()));
        assert_eq!(failure.partial.artifact(), None);
    }

    #[test]
    fn test_default_bindings() {
        let providers: Vec<Provider> = ChainConfig::default()
            .stages()
            .iter()
            .map(|(_, b)| b.provider)
            .collect();
        assert_eq!(
            providers,
            vec![
                Provider::Gemini,
                Provider::OpenAI,
                Provider::Anthropic,
                Provider::OpenRouter
            ]
        );
    }
}
