//! Per-provider request shapes and response-field extraction.
//!
//! Pure functions so each envelope can be checked without a network.

use serde_json::{json, Value};

use crate::models::Provider;

/// Anthropic API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A fully addressed provider request, ready for the HTTP client.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// Build the request for `provider`.
///
/// `base_url` is the API root without a trailing path (trailing `/` is
/// tolerated).
pub fn build_request(
    provider: Provider,
    base_url: &str,
    model: &str,
    prompt: &str,
    secret: &str,
    max_output_tokens: u32,
) -> ProviderRequest {
    let base = base_url.trim_end_matches('/');
    match provider {
        Provider::Gemini => ProviderRequest {
            url: format!("{base}/v1beta/models/{model}:generateContent"),
            headers: vec![("x-goog-api-key", secret.to_string())],
            body: json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": { "maxOutputTokens": max_output_tokens },
            }),
        },
        Provider::OpenAI => ProviderRequest {
            url: format!("{base}/v1/chat/completions"),
            headers: vec![("authorization", format!("Bearer {secret}"))],
            body: chat_completions_body(model, prompt, max_output_tokens),
        },
        Provider::OpenRouter => ProviderRequest {
            url: format!("{base}/api/v1/chat/completions"),
            headers: vec![("authorization", format!("Bearer {secret}"))],
            body: chat_completions_body(model, prompt, max_output_tokens),
        },
        Provider::Anthropic => ProviderRequest {
            url: format!("{base}/v1/messages"),
            headers: vec![
                ("x-api-key", secret.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: json!({
                "model": model,
                "max_tokens": max_output_tokens,
                "messages": [{ "role": "user", "content": prompt }],
            }),
        },
    }
}

fn chat_completions_body(model: &str, prompt: &str, max_output_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "max_tokens": max_output_tokens,
    })
}

/// Pull the generated text out of a success envelope.
///
/// Returns `None` when the envelope has no text field or only whitespace.
pub fn extract_text(provider: Provider, body: &Value) -> Option<String> {
    let text = match provider {
        Provider::Gemini => body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            }),
        Provider::OpenAI | Provider::OpenRouter => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        Provider::Anthropic => body.get("content").and_then(Value::as_array).map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        }),
    };

    text.filter(|t| !t.trim().is_empty())
}

/// Provider-reported error message, if the body carries one.
///
/// Handles `{"error": {"message": ..}}` (OpenAI, Anthropic, Gemini,
/// OpenRouter) and `{"error": "..."}`.
pub fn extract_error(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    let message = match error {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    message.filter(|m| !m.trim().is_empty())
}
