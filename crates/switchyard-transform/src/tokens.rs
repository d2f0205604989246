//! Rough token estimation for budget enforcement.
//!
//! One token per four characters plus a fixed allowance for request framing.
//! Good enough to keep `max_tokens` inside a context window; not a tokenizer.

use serde_json::{Map, Value};

use crate::transformer::utils::content_to_string;

pub const CHARS_PER_TOKEN: usize = 4;
pub const REQUEST_OVERHEAD_TOKENS: u64 = 50;

/// Estimate prompt tokens for a canonical, Anthropic or Gemini shaped body.
pub fn estimate_prompt_tokens(body: &Map<String, Value>) -> u64 {
    let mut chars = 0usize;

    for message in body.get("messages").and_then(Value::as_array).into_iter().flatten() {
        chars += text_len(&message["content"]);
    }
    for content in body.get("contents").and_then(Value::as_array).into_iter().flatten() {
        chars += text_len(&content["parts"]);
    }
    if let Some(system) = body.get("system") {
        chars += text_len(system);
    }
    if let Some(parts) = body.get("systemInstruction").and_then(|s| s.get("parts")) {
        chars += text_len(parts);
    }
    if let Some(tools) = body.get("tools").filter(|t| !t.is_null()) {
        chars += tools.to_string().len();
    }

    (chars / CHARS_PER_TOKEN) as u64 + REQUEST_OVERHEAD_TOKENS
}

fn text_len(content: &Value) -> usize {
    content_to_string(content).chars().count()
}
