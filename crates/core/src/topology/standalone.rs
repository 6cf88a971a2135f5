//! Single provider call. Failure is surfaced verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    RunFailure, RunOutcome, RunResult, StageRunner, Topology, TopologyExecutor,
};
use crate::models::{ModelConfig, Provider};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl StandaloneConfig {
    pub fn new(binding: ModelConfig) -> Self {
        Self {
            provider: binding.provider,
            model: binding.model,
        }
    }

    pub fn binding(&self) -> ModelConfig {
        ModelConfig {
            provider: self.provider,
            model: self.model.clone(),
        }
    }
}

pub struct StandaloneExecutor {
    config: StandaloneConfig,
}

impl StandaloneExecutor {
    pub fn new(config: StandaloneConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TopologyExecutor for StandaloneExecutor {
    fn topology(&self) -> Topology {
        Topology::Standalone
    }

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome {
        let binding = self.config.binding();
        match runner
            .run_stage(&binding, "assistant", prompt.to_string())
            .await
        {
            Ok(stage) => Ok(RunResult::Standalone(stage)),
            Err(failed) => Err(RunFailure {
                error: failed.source.into(),
                partial: RunResult::Standalone(failed.stage),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialResolver;
    use crate::topology::test_support::{runner, ScriptedGateway};
    use crate::EngineError;
    use std::sync::Arc;

    const PROMPT: &str = "Say hi";

    #[tokio::test]
    async fn test_prompt_sent_verbatim() {
        let gateway = Arc::new(ScriptedGateway::new().reply(Provider::Anthropic, "Hi!"));
        let executor = StandaloneExecutor::new(StandaloneConfig::new(ModelConfig::new(
            Provider::Anthropic,
        )));

        let result = executor
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap();

        assert_eq!(gateway.prompts_for(Provider::Anthropic), vec!["Say hi"]);
        assert_eq!(result.artifact().as_deref(), Some("Hi!"));
    }

    #[tokio::test]
    async fn test_failure_surfaced_with_stage_record() {
        let gateway = Arc::new(ScriptedGateway::new().fail(Provider::OpenAI, 429, "Rate limited"));
        let executor =
            StandaloneExecutor::new(StandaloneConfig::new(ModelConfig::new(Provider::OpenAI)));

        let failure = executor
            .execute(PROMPT, &runner(&gateway))
            .await
            .unwrap_err();

        assert_eq!(failure.error.to_string(), "Rate limited");
        let history = failure.partial.history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].succeeded);
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_call() {
        let gateway = Arc::new(ScriptedGateway::new());
        let runner = StageRunner::new(gateway.clone(), Arc::new(CredentialResolver::in_memory()));
        let executor =
            StandaloneExecutor::new(StandaloneConfig::new(ModelConfig::new(Provider::Gemini)));

        let failure = executor
            .execute(PROMPT, &runner)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, EngineError::Gateway(ref e) if e.is_missing_credential()));
        assert_eq!(gateway.call_count(), 0);
    }
}
