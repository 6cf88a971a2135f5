//! # Phase State Machine
//!
//! Drives a [`HiveFlow`] one phase at a time.
//!
//! ```text
//! start ──▶ phase 0 ──advance──▶ phase 1 ──advance──▶ … ──▶ last (terminal)
//!              ▲                     │
//!              └──────pivot──────────┘   (manager picks the target)
//! ```
//!
//! History is append-only. A failed call is recorded in history and leaves
//! the phase index and context untouched, so the same action can be retried.
//! A pivot whose re-entry failed is retried by the next advance.

use serde::Deserialize;
use std::sync::Arc;

use super::{HiveFlow, ManagerDirective, PhaseSpec, PhaseSummary, SwarmSession};
use crate::events::RunEventKind;
use crate::parser::parse_output;
use crate::topology::{StageResult, StageRunner};
use crate::EngineError;

/// Why a phase is being (re)run
#[derive(Debug, Clone)]
enum PhaseDirection {
    Start,
    Retry,
    Confirmed(String),
    Refinement(String),
}

impl PhaseDirection {
    fn prompt_text(&self) -> String {
        match self {
            Self::Start => "Begin from the original request.".to_string(),
            Self::Retry => {
                "The previous attempt at this phase failed. Produce this phase's output."
                    .to_string()
            }
            Self::Confirmed(choice) => {
                format!("The user confirmed this choice from the previous phase:\n{choice}")
            }
            Self::Refinement(instruction) => {
                format!("Redo this phase. Apply this refinement:\n{instruction}")
            }
        }
    }

    fn context_note(&self, phase: &PhaseSpec) -> Option<String> {
        match self {
            Self::Confirmed(choice) => Some(format!("> Confirmed: {choice}")),
            Self::Refinement(instruction) => {
                Some(format!("## Refinement → {}\n{instruction}", phase.name))
            }
            Self::Start | Self::Retry => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhaseRef {
    Index(usize),
    Name(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectiveReply {
    #[serde(default, alias = "target_phase")]
    target_phase: Option<PhaseRef>,
    #[serde(default, alias = "refinement_instruction")]
    refinement_instruction: Option<String>,
    #[serde(default, alias = "reply_text")]
    reply_text: Option<String>,
}

/// Phase sequencing for one flow
pub struct PhaseStateMachine<F: HiveFlow> {
    flow: Arc<F>,
    original_prompt: String,
    phase_index: usize,
    /// Latest successful output per phase
    outputs: Vec<Option<String>>,
    history: Vec<StageResult>,
    context: String,
    directives: Vec<ManagerDirective>,
    last_choice: Option<String>,
    /// Pivot target whose re-entry failed; the next advance retries it
    pending: Option<(usize, String)>,
}

impl<F: HiveFlow> Clone for PhaseStateMachine<F> {
    fn clone(&self) -> Self {
        Self {
            flow: Arc::clone(&self.flow),
            original_prompt: self.original_prompt.clone(),
            phase_index: self.phase_index,
            outputs: self.outputs.clone(),
            history: self.history.clone(),
            context: self.context.clone(),
            directives: self.directives.clone(),
            last_choice: self.last_choice.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<F: HiveFlow> PhaseStateMachine<F> {
    pub fn new(flow: Arc<F>, original_prompt: impl Into<String>) -> Self {
        let outputs = vec![None; flow.phases().len()];
        Self {
            flow,
            original_prompt: original_prompt.into(),
            phase_index: 0,
            outputs,
            history: Vec::new(),
            context: String::new(),
            directives: Vec::new(),
            last_choice: None,
            pending: None,
        }
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn phase_index(&self) -> usize {
        self.phase_index
    }

    pub fn current_phase(&self) -> &PhaseSpec {
        &self.flow.phases()[self.phase_index]
    }

    pub fn history(&self) -> &[StageResult] {
        &self.history
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn directives(&self) -> &[ManagerDirective] {
        &self.directives
    }

    /// Output of the current phase, if it has produced one
    pub fn latest_output(&self) -> Option<&str> {
        self.outputs[self.phase_index].as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase_index + 1 == self.outputs.len() && self.outputs[self.phase_index].is_some()
    }

    /// Final phase output, once terminal
    pub fn deliverable(&self) -> Option<&str> {
        if self.is_terminal() {
            self.latest_output()
        } else {
            None
        }
    }

    /// Run the first phase
    pub async fn start(&mut self, runner: &StageRunner) -> Result<StageResult, EngineError> {
        self.run_phase(0, PhaseDirection::Start, runner).await
    }

    /// Move to the next phase with the user's choice, or an auto-pilot
    /// pick when `choice` is empty.
    ///
    /// A pivot whose re-entry failed is retried first, with its
    /// refinement instruction. Otherwise, if the current phase has no
    /// output yet (its last call failed), the current phase is retried.
    pub async fn advance(
        &mut self,
        choice: Option<&str>,
        runner: &StageRunner,
    ) -> Result<StageResult, EngineError> {
        if let Some((target, instruction)) = self.pending.clone() {
            tracing::info!(target_phase = target, "Retrying pivot re-entry");
            return self
                .run_phase(target, PhaseDirection::Refinement(instruction), runner)
                .await;
        }

        let current = self.phase_index;
        if self.outputs[current].is_none() {
            return self.run_phase(current, PhaseDirection::Retry, runner).await;
        }
        if current + 1 >= self.outputs.len() {
            return Err(EngineError::AlreadyTerminal);
        }

        let choice = match choice.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => c.to_string(),
            None => {
                let pick = self.flow.autopilot_choice(self.latest_output());
                tracing::info!(choice = %pick, "Auto-pilot selected a direction");
                pick
            }
        };

        let stage = self
            .run_phase(current + 1, PhaseDirection::Confirmed(choice.clone()), runner)
            .await?;
        self.last_choice = Some(choice);
        Ok(stage)
    }

    /// Route feedback through the manager and re-enter the phase it picks.
    ///
    /// The manager call itself is not part of `history`; its decision is
    /// kept in `directives`.
    pub async fn pivot(
        &mut self,
        feedback: &str,
        runner: &StageRunner,
    ) -> Result<ManagerDirective, EngineError> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(EngineError::InvalidRequest("feedback is empty".to_string()));
        }

        let flow = Arc::clone(&self.flow);
        let manager = flow.manager();
        let prompt =
            flow.manager_prompt(self.phase_index, &self.original_prompt, &self.context, feedback);

        let reply = runner
            .run_stage(&manager.binding, &manager.name, prompt)
            .await
            .map_err(|failed| EngineError::from(failed.source))?;

        let directive = self.interpret_directive(&reply.text, feedback);
        tracing::info!(
            target_phase = %directive.target_phase,
            from = self.phase_index,
            "Manager routed feedback"
        );
        runner.events().emit(
            runner
                .events()
                .event(RunEventKind::Pivoted)
                .with_role(&manager.name)
                .with_data(serde_json::to_value(&directive).unwrap_or_default()),
        );
        self.directives.push(directive.clone());
        self.pending = Some((
            directive.target_index,
            directive.refinement_instruction.clone(),
        ));

        self.run_phase(
            directive.target_index,
            PhaseDirection::Refinement(directive.refinement_instruction.clone()),
            runner,
        )
        .await?;
        Ok(directive)
    }

    /// Re-enter an earlier (or the current) phase with an instruction
    pub async fn refine_loop(
        &mut self,
        phase_index: usize,
        instruction: &str,
        runner: &StageRunner,
    ) -> Result<StageResult, EngineError> {
        if phase_index > self.phase_index {
            return Err(EngineError::InvalidPhase {
                index: phase_index,
                len: self.outputs.len(),
            });
        }
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(EngineError::InvalidRequest("instruction is empty".to_string()));
        }
        self.run_phase(
            phase_index,
            PhaseDirection::Refinement(instruction.to_string()),
            runner,
        )
        .await
    }

    pub fn snapshot(&self) -> SwarmSession {
        SwarmSession {
            flow_name: self.flow.name().to_string(),
            phase_index: self.phase_index,
            phases: self
                .flow
                .phases()
                .iter()
                .zip(&self.outputs)
                .map(|(phase, output)| PhaseSummary {
                    name: phase.name.clone(),
                    role: phase.role.name.clone(),
                    provider: phase.role.binding.provider,
                    completed: output.is_some(),
                })
                .collect(),
            history: self.history.clone(),
            context_accumulator: self.context.clone(),
            directives: self.directives.clone(),
            last_choice: self.last_choice.clone(),
            deliverable: self.deliverable().map(str::to_string),
            terminal: self.is_terminal(),
        }
    }

    /// Map a manager reply onto a reachable phase; anything unusable
    /// falls back to the current phase with the raw feedback.
    fn interpret_directive(&self, reply: &str, feedback: &str) -> ManagerDirective {
        let parsed = parse_output(reply).payload_as::<DirectiveReply>();
        let phases = self.flow.phases();
        let reachable = &phases[..=self.phase_index];

        let target_index = parsed
            .as_ref()
            .and_then(|d| d.target_phase.as_ref())
            .and_then(|target| match target {
                PhaseRef::Index(i) => (*i <= self.phase_index).then_some(*i),
                PhaseRef::Name(name) => {
                    let name = name.trim();
                    reachable.iter().position(|p| {
                        p.name.eq_ignore_ascii_case(name) || p.role.name.eq_ignore_ascii_case(name)
                    })
                }
            });

        let Some(target_index) = target_index else {
            tracing::warn!("Manager reply unusable, reworking the current phase");
            let phase = &phases[self.phase_index];
            return ManagerDirective {
                target_phase: phase.name.clone(),
                target_index: self.phase_index,
                refinement_instruction: feedback.to_string(),
                reply_text: format!("Reworking the {} phase with your feedback.", phase.name),
                feedback: feedback.to_string(),
            };
        };

        let phase = &phases[target_index];
        let (instruction, reply_text) = match parsed {
            Some(d) => (d.refinement_instruction, d.reply_text),
            None => (None, None),
        };
        ManagerDirective {
            target_phase: phase.name.clone(),
            target_index,
            refinement_instruction: instruction
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| feedback.to_string()),
            reply_text: reply_text
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| format!("Revisiting the {} phase.", phase.name)),
            feedback: feedback.to_string(),
        }
    }

    /// Invoke one phase; on success commit its output and make it current
    async fn run_phase(
        &mut self,
        index: usize,
        direction: PhaseDirection,
        runner: &StageRunner,
    ) -> Result<StageResult, EngineError> {
        let flow = Arc::clone(&self.flow);
        let phase = flow.phases().get(index).ok_or(EngineError::InvalidPhase {
            index,
            len: self.outputs.len(),
        })?;

        let prompt = flow.phase_prompt(
            index,
            &self.original_prompt,
            &self.context,
            &direction.prompt_text(),
        );

        let stage = match runner.run_stage(&phase.role.binding, &phase.role.name, prompt).await {
            Ok(stage) => stage,
            Err(failed) => {
                tracing::warn!(phase = %phase.name, "Phase call failed, state unchanged");
                self.history.push(failed.stage);
                return Err(failed.source.into());
            }
        };

        if let Some(note) = direction.context_note(phase) {
            self.push_context(&note);
        }
        self.push_context(&format!(
            "## {} ({})\n{}",
            phase.name,
            phase.role.name,
            stage.text.trim()
        ));

        self.outputs[index] = Some(stage.text.clone());
        for later in self.outputs.iter_mut().skip(index + 1) {
            *later = None;
        }
        self.phase_index = index;
        self.pending = None;
        self.history.push(stage.clone());

        runner.events().emit(
            runner
                .events()
                .event(RunEventKind::PhaseAdvanced)
                .with_role(&phase.role.name)
                .with_data(serde_json::json!({ "phaseIndex": index, "phase": phase.name })),
        );

        Ok(stage)
    }

    fn push_context(&mut self, section: &str) {
        if !self.context.is_empty() {
            self.context.push_str("\n\n");
        }
        self.context.push_str(section);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hive::{AgentRole, FlowPreset, PhaseFlow, PhaseSpec};
    use crate::models::Provider;
    use crate::topology::test_support::{runner, ScriptedGateway};

    fn three_phase_flow() -> Arc<PhaseFlow> {
        let flow = PhaseFlow::new(
            "swarm",
            vec![
                PhaseSpec::new("vision", AgentRole::new("visionary", "# Role: Visionary")),
                PhaseSpec::new("blueprint", AgentRole::new("architect", "# Role: Architect")),
                PhaseSpec::new("critique", AgentRole::new("critic", "# Role: Critic")),
            ],
            AgentRole::new("manager", "# Role: Manager"),
        )
        .unwrap();
        Arc::new(flow)
    }

    #[tokio::test]
    async fn test_advance_accumulates_context() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .reply(Provider::Gemini, "BLUEPRINT")
                .reply(Provider::Gemini, "CRITIQUE"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "a todo app");

        machine.start(&runner).await.unwrap();
        machine.advance(Some("Option B"), &runner).await.unwrap();
        machine.advance(Some("Use SQLite"), &runner).await.unwrap();

        let prompts = gateway.prompts_for(Provider::Gemini);
        assert!(prompts[1].contains("Option B"));
        // Later agents see the whole chain, not just the previous phase
        assert!(prompts[2].contains("VISION") && prompts[2].contains("BLUEPRINT"));

        assert_eq!(machine.phase_index(), 2);
        assert!(machine.is_terminal());
        assert_eq!(machine.deliverable(), Some("CRITIQUE"));
        assert!(machine.context().contains("## vision (visionary)\nVISION"));
        assert!(matches!(
            machine.advance(None, &runner).await,
            Err(EngineError::AlreadyTerminal)
        ));
    }

    #[tokio::test]
    async fn test_pivot_back_to_blueprint() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .reply(Provider::Gemini, "BLUEPRINT")
                .reply(Provider::Gemini, "CRITIQUE")
                .reply(
                    Provider::Gemini,
                    r#"{"targetPhase": "blueprint", "refinementInstruction": "Use a brutalist style", "replyText": "Reworking the blueprint."}"#,
                )
                .reply(Provider::Gemini, "BLUEPRINT v2")
                .reply(Provider::Gemini, "CRITIQUE v2"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "a landing page");

        machine.start(&runner).await.unwrap();
        machine.advance(None, &runner).await.unwrap();
        machine.advance(None, &runner).await.unwrap();
        assert_eq!(machine.history().len(), 3);

        let directive = machine
            .pivot("the blueprint style is wrong", &runner)
            .await
            .unwrap();

        assert_eq!(directive.target_phase, "blueprint");
        assert_eq!(directive.target_index, 1);
        assert_eq!(directive.reply_text, "Reworking the blueprint.");
        assert_eq!(machine.history().len(), 4);
        assert_eq!(machine.phase_index(), 1);
        assert!(!machine.is_terminal());
        assert!(machine
            .context()
            .contains("## Refinement → blueprint\nUse a brutalist style"));
        assert!(gateway.prompts_for(Provider::Gemini)[4].contains("Use a brutalist style"));

        // Next advance resumes from the pivot target
        machine.advance(Some("ok"), &runner).await.unwrap();
        assert_eq!(machine.phase_index(), 2);
        assert_eq!(machine.history().len(), 5);
        assert_eq!(machine.deliverable(), Some("CRITIQUE v2"));
    }

    #[tokio::test]
    async fn test_unusable_directive_reworks_current_phase() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .reply(Provider::Gemini, "BLUEPRINT")
                .reply(Provider::Gemini, r#"{"targetPhase": "critique"}"#),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");
        machine.start(&runner).await.unwrap();
        machine.advance(None, &runner).await.unwrap();

        // "critique" is ahead of the current phase, so it is not reachable
        let directive = machine.pivot("more color", &runner).await.unwrap();

        assert_eq!(directive.target_index, 1);
        assert_eq!(directive.refinement_instruction, "more color");
        assert_eq!(machine.phase_index(), 1);
    }

    #[tokio::test]
    async fn test_directive_accepts_index_and_role_name() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .reply(Provider::Gemini, "BLUEPRINT")
                .reply(Provider::Gemini, "```json\n{\"targetPhase\": 0}\n```"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");
        machine.start(&runner).await.unwrap();
        machine.advance(None, &runner).await.unwrap();

        let directive = machine.pivot("start over", &runner).await.unwrap();
        assert_eq!(directive.target_phase, "vision");
        assert_eq!(directive.refinement_instruction, "start over");

        let by_role = machine.interpret_directive(r#"{"targetPhase": "Visionary"}"#, "x");
        assert_eq!(by_role.target_index, 0);
    }

    #[tokio::test]
    async fn test_failed_phase_leaves_state_and_retries() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .fail(Provider::Gemini, 503, "overloaded")
                .reply(Provider::Gemini, "BLUEPRINT"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");
        machine.start(&runner).await.unwrap();
        let context_before = machine.context().to_string();

        let err = machine.advance(Some("A"), &runner).await.unwrap_err();
        assert_eq!(err.to_string(), "overloaded");
        assert_eq!(machine.phase_index(), 0);
        assert_eq!(machine.context(), context_before);
        assert_eq!(machine.history().len(), 2);
        assert!(!machine.history()[1].succeeded);

        machine.advance(Some("A"), &runner).await.unwrap();
        assert_eq!(machine.phase_index(), 1);
        assert_eq!(machine.history().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_pivot_reentry_retried_by_confirm() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, "VISION")
                .reply(Provider::Gemini, "BLUEPRINT")
                .reply(
                    Provider::Gemini,
                    r#"{"targetPhase": "vision", "refinementInstruction": "Be bolder"}"#,
                )
                .fail(Provider::Gemini, 503, "overloaded")
                .reply(Provider::Gemini, "VISION v2")
                .reply(Provider::Gemini, "BLUEPRINT v2"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "a poster");
        machine.start(&runner).await.unwrap();
        machine.advance(None, &runner).await.unwrap();

        let err = machine.pivot("too timid", &runner).await.unwrap_err();
        assert_eq!(err.to_string(), "overloaded");
        assert_eq!(machine.phase_index(), 1);
        assert_eq!(machine.directives().len(), 1);
        assert_eq!(machine.directives()[0].target_index, 0);

        // Confirming re-enters the pivot target with the stored instruction
        machine.advance(None, &runner).await.unwrap();
        assert_eq!(machine.phase_index(), 0);
        assert_eq!(machine.latest_output(), Some("VISION v2"));
        let prompts = gateway.prompts_for(Provider::Gemini);
        assert!(prompts[prompts.len() - 1].contains("Be bolder"));
        assert!(machine.context().contains("## Refinement → vision\nBe bolder"));

        // Once applied, advancing moves forward again
        machine.advance(Some("ok"), &runner).await.unwrap();
        assert_eq!(machine.phase_index(), 1);
        assert_eq!(machine.latest_output(), Some("BLUEPRINT v2"));
    }

    #[tokio::test]
    async fn test_failed_start_retried_by_confirm() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .fail(Provider::Gemini, 500, "boom")
                .reply(Provider::Gemini, "VISION"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");

        assert!(machine.start(&runner).await.is_err());
        machine.advance(None, &runner).await.unwrap();

        assert_eq!(machine.phase_index(), 0);
        assert_eq!(machine.latest_output(), Some("VISION"));
    }

    #[tokio::test]
    async fn test_autopilot_uses_option_deck() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .reply(Provider::Gemini, r#"{"options": [{"label": "Only choice"}]}"#)
                .reply(Provider::Gemini, "BLUEPRINT"),
        );
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(Arc::new(FlowPreset::Swarm.build()), "idea");
        machine.start(&runner).await.unwrap();

        machine.advance(None, &runner).await.unwrap();

        assert!(gateway.prompts_for(Provider::Gemini)[1].contains("Only choice"));
        assert_eq!(machine.snapshot().last_choice.as_deref(), Some("Only choice"));
    }

    #[tokio::test]
    async fn test_refine_loop_rejects_future_phase() {
        let gateway = Arc::new(ScriptedGateway::new());
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");
        machine.start(&runner).await.unwrap();

        let err = machine.refine_loop(2, "x", &runner).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPhase { index: 2, len: 3 }));

        machine.refine_loop(0, "shorter", &runner).await.unwrap();
        assert_eq!(machine.history().len(), 2);
    }

    #[tokio::test]
    async fn test_history_never_shrinks() {
        let gateway = Arc::new(ScriptedGateway::new());
        let runner = runner(&gateway);
        let mut machine = PhaseStateMachine::new(three_phase_flow(), "idea");

        let mut last_len = 0;
        machine.start(&runner).await.unwrap();
        for step in 0..6 {
            if step % 3 == 2 {
                machine.pivot("again", &runner).await.unwrap();
            } else if machine.is_terminal() {
                machine.refine_loop(0, "again", &runner).await.unwrap();
            } else {
                machine.advance(None, &runner).await.unwrap();
            }
            assert!(machine.history().len() > last_len);
            last_len = machine.history().len();
        }
    }
}
