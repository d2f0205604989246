//! Helpers for the canonical (OpenAI-compatible) chat completion shape.

use std::collections::HashMap;

use serde_json::{json, Value};
use switchyard_config::Config;
use tracing::warn;

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const COMPLETION_OBJECT: &str = "chat.completion";

/// Canonical finish reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// Completed naturally
    Stop,
    /// Hit token limit
    Length,
    /// Tool calls were made
    ToolCalls,
    /// Content was filtered
    ContentFilter,
}

impl FinishReason {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stop" => Some(Self::Stop),
            "length" => Some(Self::Length),
            "tool_calls" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vendor finish reason lookup loaded from configuration.
///
/// Unknown or missing vendor reasons map to [`FinishReason::Stop`].
#[derive(Debug, Clone, Default)]
pub struct FinishReasonTable {
    entries: HashMap<String, FinishReason>,
}

impl FinishReasonTable {
    pub fn from_config(vendor: &str, config: &Config) -> Self {
        config
            .finish_reasons
            .get(vendor)
            .map(|entries| Self::from_entries(vendor, entries))
            .unwrap_or_default()
    }

    pub fn from_entries(vendor: &str, entries: &HashMap<String, String>) -> Self {
        let entries = entries
            .iter()
            .filter_map(|(raw, canonical)| match FinishReason::parse(canonical) {
                Some(reason) => Some((raw.clone(), reason)),
                None => {
                    warn!(vendor, raw = %raw, canonical = %canonical, "ignoring unknown finish reason mapping");
                    None
                }
            })
            .collect();
        Self { entries }
    }

    pub fn map(&self, raw: Option<&str>) -> FinishReason {
        raw.and_then(|r| self.entries.get(r).copied())
            .unwrap_or(FinishReason::Stop)
    }
}

/// Shared fields of every chunk emitted for one streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTemplate {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkTemplate {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: unix_now(),
            model: model.into(),
        }
    }

    pub fn chunk(&self, index: u64, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": CHUNK_OBJECT,
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": index,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Reads a token count, treating absent or non-numeric values as zero.
pub fn token_count(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0)
}

pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> Value {
    json!({
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": prompt_tokens + completion_tokens,
    })
}
