use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::warn;

use super::types::{ToolFormat, ToolResult, ToolUse};
use crate::error::{Result, TransformError};
use crate::transformer::utils::{json_type_name, parse_arguments};

/// Check a canonical tool definition: non-empty name and description, and an
/// object schema when one is given.
pub fn validate_tool_definition(tool: &Value) -> Result<()> {
    let obj = tool.as_object().ok_or_else(|| TransformError::InvalidToolDefinition {
        tool: String::new(),
        reason: format!("tool must be an object, got {}", json_type_name(tool)),
    })?;

    let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
    if name.is_empty() {
        return Err(TransformError::InvalidToolDefinition {
            tool: String::new(),
            reason: "tool must have a non-empty name".to_string(),
        });
    }

    let description = obj.get("description").and_then(Value::as_str).unwrap_or_default();
    if description.is_empty() {
        return Err(TransformError::InvalidToolDefinition {
            tool: name.to_string(),
            reason: "tool must have a non-empty description".to_string(),
        });
    }

    if let Some(schema) = obj.get("input_schema") {
        if !schema.is_object() {
            return Err(TransformError::InvalidToolDefinition {
                tool: name.to_string(),
                reason: format!("input_schema must be an object, got {}", json_type_name(schema)),
            });
        }
    }

    Ok(())
}

/// Bring an OpenAI-wrapped or canonical tool into canonical form.
pub fn normalize_tool(tool: &Value) -> Value {
    match tool.get("function").filter(|f| f.is_object()) {
        Some(function) => {
            let mut out = Map::new();
            for key in ["name", "description"] {
                if let Some(v) = function.get(key) {
                    out.insert(key.to_string(), v.clone());
                }
            }
            if let Some(params) = function.get("parameters") {
                out.insert("input_schema".to_string(), params.clone());
            }
            Value::Object(out)
        }
        None => tool.clone(),
    }
}

/// Reshape canonical tools for a provider. Unknown providers get the list unchanged.
pub fn transform_tools_for_provider(tools: &[Value], provider: &str) -> Vec<Value> {
    let Some(format) = ToolFormat::for_provider(provider) else {
        warn!(provider, "unknown provider for tool transformation");
        return tools.to_vec();
    };

    match format {
        ToolFormat::Anthropic => tools.to_vec(),
        ToolFormat::OpenAi => tools
            .iter()
            .filter(|t| t.is_object())
            .map(|tool| {
                let mut function = json!({
                    "name": tool.get("name"),
                    "description": tool.get("description"),
                });
                if let Some(schema) = tool.get("input_schema") {
                    function["parameters"] = schema.clone();
                }
                json!({"type": "function", "function": function})
            })
            .collect(),
        ToolFormat::Gemini => tools
            .iter()
            .filter(|t| t.is_object())
            .map(|tool| {
                let mut out = json!({
                    "name": tool.get("name"),
                    "description": tool.get("description"),
                });
                if let Some(properties) = tool.get("input_schema").and_then(|s| s.get("properties")) {
                    out["parameters"] = properties.clone();
                }
                out
            })
            .collect(),
    }
}

/// Collect tool invocations from a message.
///
/// Understands both `tool_use` content blocks and canonical `tool_calls`.
pub fn extract_tool_uses(message: &Value) -> Vec<ToolUse> {
    let mut uses = Vec::new();

    if let Some(blocks) = message.get("content").and_then(Value::as_array) {
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            uses.push(ToolUse {
                id: string_field(block, "id"),
                name: string_field(block, "name"),
                input: block.get("input").cloned().unwrap_or(Value::Null),
            });
        }
    }

    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").unwrap_or(&Value::Null);
            uses.push(ToolUse {
                id: string_field(call, "id"),
                name: string_field(function, "name"),
                input: parse_arguments(function.get("arguments")),
            });
        }
    }

    uses
}

/// Build the user message carrying tool results back to the model.
pub fn create_tool_result_message(results: &[ToolResult]) -> Value {
    let content: Vec<Value> = results
        .iter()
        .map(|result| {
            let content = match &result.error {
                Some(error) => json!({"error": error}),
                None => result.content.clone(),
            };
            json!({
                "type": "tool_result",
                "tool_use_id": result.tool_use_id,
                "content": content,
            })
        })
        .collect();

    json!({"role": "user", "content": content})
}

/// Map of tool call id to tool name across a conversation.
pub fn tool_call_names(messages: &[Value]) -> HashMap<String, String> {
    messages
        .iter()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
        .flat_map(extract_tool_uses)
        .filter(|u| !u.id.is_empty())
        .map(|u| (u.id, u.name))
        .collect()
}

/// Ids of tool results that do not answer any earlier tool call.
pub fn unmatched_tool_results(messages: &[Value]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unmatched = Vec::new();

    for message in messages {
        for tool_use in extract_tool_uses(message) {
            seen.insert(tool_use.id);
        }

        if message.get("role").and_then(Value::as_str) == Some("tool") {
            let id = string_field(message, "tool_call_id");
            if !seen.contains(&id) {
                unmatched.push(id);
            }
        }

        if let Some(blocks) = message.get("content").and_then(Value::as_array) {
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                    let id = string_field(block, "tool_use_id");
                    if !seen.contains(&id) {
                        unmatched.push(id);
                    }
                }
            }
        }
    }

    unmatched
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
