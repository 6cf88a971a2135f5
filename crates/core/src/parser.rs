//! # Result Parser
//!
//! Extracts structured payloads embedded in free-form provider text.
//!
//! Tried in order, each failure falling through to the next:
//!
//! 1. fenced or brace-delimited JSON → [`ParsedOutput::Structured`]
//! 2. `<reasoning>`/`<output>` (or `<think>`) tags → [`ParsedOutput::ReasoningSplit`]
//! 3. anything else → [`ParsedOutput::Raw`]
//!
//! Parsing is total: malformed model output never raises.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Tagged parse result for one provider output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedOutput {
    /// A JSON object (or array) found in the text
    Structured { payload: Value },
    /// Collapsible reasoning plus the final answer
    ReasoningSplit { reasoning: String, output: String },
    /// Literal text
    Raw { text: String },
}

impl ParsedOutput {
    /// Text to show as the stage's answer
    pub fn display_text(&self) -> String {
        match self {
            Self::Structured { payload } => {
                serde_json::to_string_pretty(payload).unwrap_or_default()
            }
            Self::ReasoningSplit { output, .. } => output.clone(),
            Self::Raw { text } => text.clone(),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Structured { payload } => Some(payload),
            _ => None,
        }
    }

    /// Deserialize the structured payload into `T`, if it fits
    pub fn payload_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Option deck offered by a phase agent
    pub fn option_deck(&self) -> Option<OptionDeck> {
        self.payload_as::<OptionDeck>()
            .filter(|deck| !deck.options.is_empty())
    }

    /// File-tree blueprint produced by a terminal phase
    pub fn blueprint(&self) -> Option<Blueprint> {
        self.payload_as::<Blueprint>()
            .filter(|bp| !bp.files.is_empty())
    }
}

/// A deck of choices the user (or auto-pilot) picks from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptionDeck {
    #[serde(default)]
    pub title: Option<String>,
    pub options: Vec<DeckOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckOption {
    pub label: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DeckOption {
    /// Value sent forward when this option is chosen
    pub fn choice_text(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.label)
    }
}

/// Downloadable project skeleton
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    #[serde(default)]
    pub project_name: Option<String>,
    pub files: Vec<BlueprintFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintFile {
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Parse provider text into exactly one representation
pub fn parse_output(text: &str) -> ParsedOutput {
    if let Some(payload) = extract_json_payload(text) {
        return ParsedOutput::Structured { payload };
    }

    if let Some((reasoning, output)) = split_reasoning(text) {
        return ParsedOutput::ReasoningSplit { reasoning, output };
    }

    ParsedOutput::Raw {
        text: text.to_string(),
    }
}

fn fence_regex() -> &'static Regex {
    static RE_FENCE: OnceLock<Regex> = OnceLock::new();
    RE_FENCE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap())
}

/// Find the first JSON object/array in the text.
///
/// Candidates: fenced blocks, then the whole text, then the outermost
/// `{ .. }` span.
pub fn extract_json_payload(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut candidates: Vec<&str> = fence_regex()
        .captures_iter(trimmed)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    candidates.push(trimmed);
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    for candidate in candidates {
        if !(candidate.starts_with('{') || candidate.starts_with('[')) {
            continue;
        }
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) if value.is_object() || value.is_array() => return Some(value),
            Ok(_) => {}
            Err(e) => tracing::trace!("JSON candidate rejected: {}", e),
        }
    }

    None
}

fn tag_regexes() -> &'static (Regex, Regex, Regex) {
    static RE_TAGS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    RE_TAGS.get_or_init(|| {
        (
            Regex::new(r"(?s)<reasoning>(.*?)</reasoning>").unwrap(),
            Regex::new(r"(?s)<output>(.*?)</output>").unwrap(),
            Regex::new(r"(?s)<think(?:ing)?>(.*?)</think(?:ing)?>").unwrap(),
        )
    })
}

/// Split a reasoning/output tag pair.
///
/// `<reasoning>` without `<output>` treats the text outside the reasoning
/// block as the output; `<think>` blocks are followed by the answer.
pub fn split_reasoning(text: &str) -> Option<(String, String)> {
    let (re_reasoning, re_output, re_think) = tag_regexes();

    let reasoning_match = re_reasoning
        .captures(text)
        .or_else(|| re_think.captures(text))?;
    let whole = reasoning_match.get(0)?;
    let reasoning = reasoning_match.get(1)?.as_str().trim().to_string();

    let output = match re_output.captures(text) {
        Some(c) => c.get(1).map(|m| m.as_str().trim().to_string())?,
        None => {
            let mut rest = String::with_capacity(text.len());
            rest.push_str(&text[..whole.start()]);
            rest.push_str(&text[whole.end()..]);
            rest.trim().to_string()
        }
    };

    if reasoning.is_empty() && output.is_empty() {
        return None;
    }
    Some((reasoning, output))
}
