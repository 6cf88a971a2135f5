//! # Refine
//!
//! Draft, critique along a focus dimension, then a polished rewrite.
//! The drafter writes both the draft and the final; the critic only
//! critiques. The first failure aborts the run and is surfaced with the
//! stages completed so far.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    RunFailure, RunOutcome, RunResult, StageResult, StageRunner, Topology,
    TopologyExecutor,
};
use crate::models::{ModelConfig, Provider};
use crate::prompts;

/// What the critic looks for
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FocusDimension {
    #[default]
    General,
    Security,
    Performance,
    Cleanliness,
    RedTeam,
}

impl FocusDimension {
    pub fn all() -> Vec<FocusDimension> {
        vec![
            FocusDimension::General,
            FocusDimension::Security,
            FocusDimension::Performance,
            FocusDimension::Cleanliness,
            FocusDimension::RedTeam,
        ]
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            FocusDimension::General => {
                "Review overall correctness, completeness and clarity."
            }
            FocusDimension::Security => {
                "Hunt for security flaws: injection, unsafe input handling, leaked secrets and missing authorization."
            }
            FocusDimension::Performance => {
                "Look for wasted work: needless allocations, repeated computation, blocking calls and poor algorithmic complexity."
            }
            FocusDimension::Cleanliness => {
                "Judge readability and structure: naming, duplication, dead code and unclear control flow."
            }
            FocusDimension::RedTeam => {
                "Argue against the draft as an adversary would. Find the assumptions that break and the cases it ignores."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefineConfig {
    #[serde(default = "default_drafter")]
    pub drafter: ModelConfig,
    #[serde(default = "default_critic")]
    pub critic: ModelConfig,
    #[serde(default)]
    pub focus: FocusDimension,
}

fn default_drafter() -> ModelConfig {
    ModelConfig::new(Provider::Gemini)
}

fn default_critic() -> ModelConfig {
    ModelConfig::new(Provider::Anthropic)
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            drafter: default_drafter(),
            critic: default_critic(),
            focus: FocusDimension::default(),
        }
    }
}

/// Draft, critique and final, filled in order. A failed stage sits in its
/// own slot and the later slots stay empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefineSession {
    pub focus: FocusDimension,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "final")]
    pub final_stage: Option<StageResult>,
}

impl RefineSession {
    pub fn new(focus: FocusDimension) -> Self {
        Self {
            focus,
            ..Default::default()
        }
    }

    pub fn stages(&self) -> Vec<&StageResult> {
        [&self.draft, &self.critique, &self.final_stage]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn final_text(&self) -> Option<&str> {
        self.final_stage
            .as_ref()
            .filter(|s| s.succeeded)
            .map(|s| s.text.as_str())
    }
}

pub struct RefineExecutor {
    config: RefineConfig,
}

impl RefineExecutor {
    pub fn new(config: RefineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TopologyExecutor for RefineExecutor {
    fn topology(&self) -> Topology {
        Topology::Refine
    }

    async fn execute(&self, prompt: &str, runner: &StageRunner) -> RunOutcome {
        let original = prompt;
        let focus = self.config.focus;
        let mut session = RefineSession::new(focus);

        macro_rules! stage_or_abort {
            ($slot:ident, $outcome:expr) => {
                match $outcome {
                    Ok(stage) => {
                        session.$slot = Some(stage);
                        session.$slot.as_ref().map(|s| s.text.clone()).unwrap_or_default()
                    }
                    Err(failed) => {
                        session.$slot = Some(failed.stage);
                        return Err(RunFailure {
                            error: failed.source.into(),
                            partial: RunResult::Refine(session),
                        });
                    }
                }
            };
        }

        let draft = stage_or_abort!(
            draft,
            runner
                .run_stage(
                    &self.config.drafter,
                    "drafter",
                    prompts::compose(prompts::REFINE_DRAFT, &[("Request", original)]),
                )
                .await
        );

        let critique = stage_or_abort!(
            critique,
            runner
                .run_stage(
                    &self.config.critic,
                    "critic",
                    prompts::compose(
                        prompts::REFINE_CRITIQUE,
                        &[
                            ("Focus", focus.instruction()),
                            ("Original request", original),
                            ("Draft", draft.as_str()),
                        ],
                    ),
                )
                .await
        );

        stage_or_abort!(
            final_stage,
            runner
                .run_stage(
                    &self.config.drafter,
                    "drafter",
                    prompts::compose(
                        prompts::REFINE_POLISH,
                        &[
                            ("Original request", original),
                            ("Draft", draft.as_str()),
                            ("Critique", critique.as_str()),
                        ],
                    ),
                )
                .await
        );

        tracing::info!(focus = ?focus, "Refine finished");
        Ok(RunResult::Refine(session))
    }
}
