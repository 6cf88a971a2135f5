//! Default role instructions bundled at compile time.
//!
//! Every stage or phase prompt starts with one of these, followed by the
//! material that role works on.

// Chain roles
pub const CHAIN_DRAFT: &str = include_str!("defaults/chain_draft.md");
pub const CHAIN_REASON: &str = include_str!("defaults/chain_reason.md");
pub const CHAIN_CONDENSE: &str = include_str!("defaults/chain_condense.md");
pub const CHAIN_POLISH: &str = include_str!("defaults/chain_polish.md");

// Refine roles
pub const REFINE_DRAFT: &str = include_str!("defaults/refine_draft.md");
pub const REFINE_CRITIQUE: &str = include_str!("defaults/refine_critique.md");
pub const REFINE_POLISH: &str = include_str!("defaults/refine_polish.md");

/// Manager - routes free-text feedback to a phase
pub const MANAGER: &str = include_str!("defaults/manager.md");

// Swarm flow
pub const VISIONARY: &str = include_str!("defaults/visionary.md");
pub const ARCHITECT: &str = include_str!("defaults/architect.md");
pub const CRITIC: &str = include_str!("defaults/critic.md");
pub const EXECUTIVE: &str = include_str!("defaults/executive.md");

// Art direction flow
pub const MUSE: &str = include_str!("defaults/muse.md");
pub const STYLIST: &str = include_str!("defaults/stylist.md");
pub const CINEMATOGRAPHER: &str = include_str!("defaults/cinematographer.md");
pub const GALLERY: &str = include_str!("defaults/gallery.md");

// Video direction flow
pub const SCREENWRITER: &str = include_str!("defaults/screenwriter.md");
pub const DIRECTOR: &str = include_str!("defaults/director.md");
pub const EDITOR: &str = include_str!("defaults/editor.md");
pub const PRODUCER: &str = include_str!("defaults/producer.md");

/// Join role instructions and the material the role works on
pub fn compose(instructions: &str, sections: &[(&str, &str)]) -> String {
    let mut prompt = instructions.trim_end().to_string();
    for (heading, body) in sections {
        if body.trim().is_empty() {
            continue;
        }
        prompt.push_str("\n\n## ");
        prompt.push_str(heading);
        prompt.push('\n');
        prompt.push_str(body.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_defaults() -> Vec<(&'static str, &'static str)> {
        vec![
            ("chain_draft", CHAIN_DRAFT),
            ("chain_reason", CHAIN_REASON),
            ("chain_condense", CHAIN_CONDENSE),
            ("chain_polish", CHAIN_POLISH),
            ("refine_draft", REFINE_DRAFT),
            ("refine_critique", REFINE_CRITIQUE),
            ("refine_polish", REFINE_POLISH),
            ("manager", MANAGER),
            ("visionary", VISIONARY),
            ("architect", ARCHITECT),
            ("critic", CRITIC),
            ("executive", EXECUTIVE),
            ("muse", MUSE),
            ("stylist", STYLIST),
            ("cinematographer", CINEMATOGRAPHER),
            ("gallery", GALLERY),
            ("screenwriter", SCREENWRITER),
            ("director", DIRECTOR),
            ("editor", EDITOR),
            ("producer", PRODUCER),
        ]
    }

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_prompt_count() {
        assert_eq!(all_defaults().len(), 20, "Should have 20 default prompts");
    }

    #[test]
    fn test_compose_skips_empty_sections() {
        let prompt = compose("# Role", &[("Input", "text"), ("Context", "  ")]);
        assert_eq!(prompt, "# Role\n\n## Input\ntext");
    }
}
