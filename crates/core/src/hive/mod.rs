//! # Hive
//!
//! Phased multi-agent flows driven by user confirmation.
//!
//! A flow is an ordered list of phases, each owned by one agent role, plus
//! a manager role that turns free-text feedback into a routing decision.
//! The three presets share one [`PhaseStateMachine`]; only their
//! [`HiveFlow`] data differs.
//!
//! ```text
//! swarm            vision → blueprint → critique → execution
//! art direction    concept → style → camera → gallery
//! video direction  story → direction → edit → production
//! ```

pub mod machine;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::models::{ModelConfig, Provider};
use crate::parser::parse_output;
use crate::prompts;
use crate::topology::StageResult;
use crate::EngineError;

pub use machine::PhaseStateMachine;

/// Direction used when auto-pilot finds no option deck to pick from
pub const AUTOPILOT_FALLBACK: &str =
    "Proceed with the strongest direction from the previous phase.";

/// An agent persona bound to a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRole {
    pub name: String,
    pub binding: ModelConfig,
    pub instructions: String,
}

impl AgentRole {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: ModelConfig::default(),
            instructions: instructions.into(),
        }
    }

    pub fn with_binding(mut self, binding: ModelConfig) -> Self {
        self.binding = binding;
        self
    }
}

/// One phase and the role that owns it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpec {
    pub name: String,
    pub role: AgentRole,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Phase list and prompt construction for one flow.
///
/// Implementors supply data; the defaults build prompts from the
/// accumulated context.
pub trait HiveFlow: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered, non-empty
    fn phases(&self) -> &[PhaseSpec];

    fn manager(&self) -> &AgentRole;

    fn phase_prompt(&self, index: usize, original: &str, context: &str, direction: &str) -> String {
        let role = &self.phases()[index].role;
        prompts::compose(
            &role.instructions,
            &[
                ("Original request", original),
                ("Work so far", context),
                ("Direction for this phase", direction),
            ],
        )
    }

    fn manager_prompt(&self, current: usize, original: &str, context: &str, feedback: &str) -> String {
        let outline = self
            .phases()
            .iter()
            .enumerate()
            .take(current + 1)
            .map(|(i, p)| {
                let marker = if i == current { " (current)" } else { "" };
                format!("{i}. {} - {}{marker}", p.name, p.role.name)
            })
            .collect::<Vec<_>>()
            .join("\n");
        prompts::compose(
            &self.manager().instructions,
            &[
                ("Phases", outline.as_str()),
                ("Original request", original),
                ("Work so far", context),
                ("User feedback", feedback),
            ],
        )
    }

    /// Direction used when advancing without a user choice
    fn autopilot_choice(&self, latest_output: Option<&str>) -> String {
        latest_output
            .and_then(|text| parse_output(text).option_deck())
            .and_then(|deck| {
                deck.options
                    .choose(&mut rand::thread_rng())
                    .map(|option| option.choice_text().to_string())
            })
            .unwrap_or_else(|| AUTOPILOT_FALLBACK.to_string())
    }
}

/// Flow assembled from data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseFlow {
    name: String,
    phases: Vec<PhaseSpec>,
    manager: AgentRole,
}

impl PhaseFlow {
    pub fn new(
        name: impl Into<String>,
        phases: Vec<PhaseSpec>,
        manager: AgentRole,
    ) -> Result<Self, EngineError> {
        if phases.is_empty() {
            return Err(EngineError::InvalidRequest(
                "a flow needs at least one phase".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            phases,
            manager,
        })
    }

    /// Bind every role, the manager included, to one provider/model
    pub fn with_binding(mut self, binding: &ModelConfig) -> Self {
        for phase in &mut self.phases {
            phase.role.binding = binding.clone();
        }
        self.manager.binding = binding.clone();
        self
    }
}

impl HiveFlow for PhaseFlow {
    fn name(&self) -> &str {
        &self.name
    }

    fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    fn manager(&self) -> &AgentRole {
        &self.manager
    }
}

/// Built-in flows
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowPreset {
    #[default]
    Swarm,
    ArtDirection,
    VideoDirection,
}

impl FlowPreset {
    pub fn id(&self) -> &'static str {
        match self {
            FlowPreset::Swarm => "swarm",
            FlowPreset::ArtDirection => "art_direction",
            FlowPreset::VideoDirection => "video_direction",
        }
    }

    fn roster(&self) -> [(&'static str, &'static str, &'static str); 4] {
        match self {
            FlowPreset::Swarm => [
                ("vision", "visionary", prompts::VISIONARY),
                ("blueprint", "architect", prompts::ARCHITECT),
                ("critique", "critic", prompts::CRITIC),
                ("execution", "executive", prompts::EXECUTIVE),
            ],
            FlowPreset::ArtDirection => [
                ("concept", "muse", prompts::MUSE),
                ("style", "stylist", prompts::STYLIST),
                ("camera", "cinematographer", prompts::CINEMATOGRAPHER),
                ("gallery", "gallery", prompts::GALLERY),
            ],
            FlowPreset::VideoDirection => [
                ("story", "screenwriter", prompts::SCREENWRITER),
                ("direction", "director", prompts::DIRECTOR),
                ("edit", "editor", prompts::EDITOR),
                ("production", "producer", prompts::PRODUCER),
            ],
        }
    }

    /// Flow with every role on the default provider
    pub fn build(&self) -> PhaseFlow {
        PhaseFlow {
            name: self.id().to_string(),
            phases: self
                .roster()
                .into_iter()
                .map(|(phase, role, instructions)| {
                    PhaseSpec::new(phase, AgentRole::new(role, instructions))
                })
                .collect(),
            manager: AgentRole::new("manager", prompts::MANAGER),
        }
    }
}

/// Manager routing decision for one piece of feedback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagerDirective {
    /// Phase name
    pub target_phase: String,
    pub target_index: usize,
    pub refinement_instruction: String,
    /// Shown to the user
    pub reply_text: String,
    pub feedback: String,
}

/// Phase as shown in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub name: String,
    pub role: String,
    pub provider: Provider,
    pub completed: bool,
}

/// Serializable view of a phase machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwarmSession {
    pub flow_name: String,
    pub phase_index: usize,
    pub phases: Vec<PhaseSummary>,
    pub history: Vec<StageResult>,
    pub context_accumulator: String,
    pub directives: Vec<ManagerDirective>,
    /// Choice the last advance was made with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_choice: Option<String>,
    /// Final phase output once the flow is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<String>,
    pub terminal: bool,
}

impl SwarmSession {
    /// Output of the most recent successful phase call
    pub fn latest_output(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|s| s.succeeded)
            .map(|s| s.text.as_str())
    }

    pub fn current_phase(&self) -> Option<&PhaseSummary> {
        self.phases.get(self.phase_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_have_four_phases() {
        for preset in [
            FlowPreset::Swarm,
            FlowPreset::ArtDirection,
            FlowPreset::VideoDirection,
        ] {
            let flow = preset.build();
            assert_eq!(flow.phases().len(), 4, "{}", preset.id());
            assert!(flow.phases().iter().all(|p| !p.role.instructions.is_empty()));
            assert_eq!(flow.manager().name, "manager");
        }
    }

    #[test]
    fn test_with_binding_covers_manager() {
        let binding = ModelConfig::new(Provider::Anthropic).with_model("claude-3-haiku");
        let flow = FlowPreset::ArtDirection.build().with_binding(&binding);
        assert!(flow.phases().iter().all(|p| p.role.binding == binding));
        assert_eq!(flow.manager().binding, binding);
    }

    #[test]
    fn test_empty_flow_rejected() {
        let err = PhaseFlow::new("empty", vec![], AgentRole::new("manager", "m")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_autopilot_picks_from_deck() {
        let flow = FlowPreset::Swarm.build();
        let output = r#"{"options": [{"label": "Noir"}, {"label": "Pastel", "value": "pastel palette"}]}"#;
        for _ in 0..20 {
            let choice = flow.autopilot_choice(Some(output));
            assert!(choice == "Noir" || choice == "pastel palette", "{choice}");
        }
    }

    #[test]
    fn test_autopilot_fallback() {
        let flow = FlowPreset::Swarm.build();
        assert_eq!(flow.autopilot_choice(Some("just prose")), AUTOPILOT_FALLBACK);
        assert_eq!(flow.autopilot_choice(None), AUTOPILOT_FALLBACK);
    }

    #[test]
    fn test_manager_prompt_lists_reachable_phases() {
        let flow = FlowPreset::Swarm.build();
        let prompt = flow.manager_prompt(1, "idea", "context", "make it cheaper");
        assert!(prompt.contains("0. vision - visionary"));
        assert!(prompt.contains("1. blueprint - architect (current)"));
        assert!(!prompt.contains("critique - critic"));
        assert!(prompt.contains("make it cheaper"));
    }
}
