//! Tool call extraction from streaming deltas.

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::ToolUse;
use crate::transformer::utils::parse_arguments;

/// First sighting of a tool call in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseStart {
    pub index: u64,
    pub id: String,
    pub name: String,
}

/// Find tool calls opened by one streamed chunk.
///
/// Handles canonical `choices[].delta.tool_calls` entries carrying an id and
/// Anthropic `content_block_start` events with a `tool_use` block.
pub fn extract_tool_use_starts(chunk: &Value) -> Vec<ToolUseStart> {
    if chunk.get("type").and_then(Value::as_str) == Some("content_block_start") {
        let block = &chunk["content_block"];
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            return Vec::new();
        }
        return vec![ToolUseStart {
            index: chunk.get("index").and_then(Value::as_u64).unwrap_or(0),
            id: block["id"].as_str().unwrap_or_default().to_string(),
            name: block["name"].as_str().unwrap_or_default().to_string(),
        }];
    }

    let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
        return Vec::new();
    };

    choices
        .iter()
        .filter_map(|choice| choice.pointer("/delta/tool_calls").and_then(Value::as_array))
        .flatten()
        .filter_map(|call| {
            let id = call.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())?;
            Some(ToolUseStart {
                index: call.get("index").and_then(Value::as_u64).unwrap_or(0),
                id: id.to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles streamed tool calls from their argument fragments.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one canonical chunk.
    pub fn push_chunk(&mut self, chunk: &Value) {
        let Some(choices) = chunk.get("choices").and_then(Value::as_array) else {
            return;
        };
        for call in choices
            .iter()
            .filter_map(|c| c.pointer("/delta/tool_calls").and_then(Value::as_array))
            .flatten()
        {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
            let entry = self.calls.entry(index).or_default();
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                entry.id = id.to_string();
            }
            if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                entry.name.push_str(name);
            }
            if let Some(fragment) = call.pointer("/function/arguments").and_then(Value::as_str) {
                entry.arguments.push_str(fragment);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order. Unparseable arguments become `{}`.
    pub fn finish(self) -> Vec<ToolUse> {
        self.calls
            .into_values()
            .map(|call| ToolUse {
                id: call.id,
                name: call.name,
                input: parse_arguments(Some(&Value::String(call.arguments))),
            })
            .collect()
    }
}
