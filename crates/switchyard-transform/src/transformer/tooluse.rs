//! Tool mode: force the model to end every turn with a tool call.
//!
//! Requests get a reminder and a synthetic `ExitTool`; responses turn an
//! `ExitTool` call back into plain assistant text. Place this transformer
//! ahead of the provider transformer so it sees canonical shapes both ways.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::utils::{body_object, parse_arguments, take_messages};
use super::Transformer;
use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, rewrite_event_stream, StreamRewriter};
use crate::tools::{extract_tool_use_starts, ToolCallAccumulator};

pub const NAME: &str = "tooluse";
pub const EXIT_TOOL: &str = "ExitTool";

pub const TOOL_MODE_REMINDER: &str = "You are in tool mode. When you have completed the user's request, you MUST call the ExitTool function to exit tool mode and return to normal conversation.";
pub const EXIT_TOOL_DESCRIPTION: &str = "Exit tool mode and return to normal conversation. Call this when you have completed the user's request.";
pub const DEFAULT_EXIT_CONTENT: &str = "I have completed the requested task.";

#[derive(Debug, Default)]
pub struct ToolUseTransformer;

impl ToolUseTransformer {
    pub fn new() -> Self {
        Self
    }
}

fn exit_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": EXIT_TOOL,
            "description": EXIT_TOOL_DESCRIPTION,
            "parameters": {"type": "object", "properties": {}, "required": []},
        }
    })
}

fn is_exit_call(call: &Value) -> bool {
    call.pointer("/function/name").and_then(Value::as_str) == Some(EXIT_TOOL)
}

/// Text to show in place of an `ExitTool` call.
fn exit_content(arguments: &Value) -> String {
    arguments
        .get("response")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_EXIT_CONTENT)
        .to_string()
}

fn strip_exit_calls(response: &mut Value) {
    let Some(choices) = response.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) else {
            continue;
        };
        let Some(Value::Array(calls)) = message.remove("tool_calls") else {
            continue;
        };
        let (exits, kept): (Vec<Value>, Vec<Value>) = calls.into_iter().partition(is_exit_call);
        let Some(exit) = exits.first() else {
            message.insert("tool_calls".into(), Value::Array(kept));
            continue;
        };

        let arguments = parse_arguments(exit.pointer("/function/arguments"));
        let empty = message
            .get("content")
            .map(|c| c.is_null() || c.as_str() == Some(""))
            .unwrap_or(true);
        if empty {
            message.insert("content".into(), json!(exit_content(&arguments)));
        }

        let only_exit = kept.is_empty();
        if !only_exit {
            message.insert("tool_calls".into(), Value::Array(kept));
        }
        if only_exit && choice.get("finish_reason").and_then(Value::as_str) == Some("tool_calls") {
            choice["finish_reason"] = json!("stop");
        }
    }
}

/// Per-stream `ExitTool` suppression.
#[derive(Default)]
struct ExitToolStream {
    exit_indices: HashSet<u64>,
    exit_calls: ToolCallAccumulator,
    other_tools: bool,
    content_sent: bool,
    pending: Option<Value>,
}

impl ExitToolStream {
    /// Content chunk replacing the exit call, built on `template`.
    fn take_exit_content(&mut self, template: &Value) -> Option<SseEvent> {
        self.pending.take()?;
        if self.content_sent {
            return None;
        }
        let calls = std::mem::take(&mut self.exit_calls).finish();
        let text = calls
            .first()
            .map(|call| exit_content(&call.input))
            .unwrap_or_else(|| DEFAULT_EXIT_CONTENT.to_string());
        self.content_sent = true;

        let mut chunk = template.clone();
        if let Some(choice) = chunk.pointer_mut("/choices/0") {
            choice["delta"] = json!({"content": text});
            choice["finish_reason"] = Value::Null;
        }
        if let Some(obj) = chunk.as_object_mut() {
            obj.remove("usage");
        }
        Some(SseEvent::json(&chunk))
    }
}

impl StreamRewriter for ExitToolStream {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if event.is_done() {
            let mut out = Vec::new();
            if let Some(template) = self.pending.clone() {
                out.extend(self.take_exit_content(&template));
            }
            out.push(event);
            return out;
        }
        let Some(mut chunk) = parse_event_json(&event, NAME) else {
            return vec![event];
        };

        for start in extract_tool_use_starts(&chunk) {
            if start.name == EXIT_TOOL {
                debug!(index = start.index, "suppressing ExitTool call in stream");
                self.exit_indices.insert(start.index);
            }
        }

        let mut dropped_all_calls = false;
        if let Some(delta) = chunk.pointer_mut("/choices/0/delta").and_then(Value::as_object_mut) {
            if delta.get("content").and_then(Value::as_str).is_some_and(|c| !c.is_empty()) {
                self.content_sent = true;
            }
            if let Some(Value::Array(calls)) = delta.remove("tool_calls") {
                let (exits, kept): (Vec<Value>, Vec<Value>) = calls.into_iter().partition(|call| {
                    let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                    self.exit_indices.contains(&index)
                });
                if !exits.is_empty() {
                    self.exit_calls
                        .push_chunk(&json!({"choices": [{"delta": {"tool_calls": exits}}]}));
                }
                if kept.is_empty() {
                    dropped_all_calls = true;
                } else {
                    self.other_tools = true;
                    delta.insert("tool_calls".into(), Value::Array(kept));
                }
            }
        }

        if !self.exit_indices.is_empty() && self.pending.is_none() && !self.content_sent {
            self.pending = Some(chunk.clone());
        }

        let finish = chunk
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut out = Vec::new();
        if let Some(finish) = finish {
            if let Some(template) = self.pending.clone() {
                out.extend(self.take_exit_content(&template));
            }
            if finish == "tool_calls" && !self.exit_indices.is_empty() && !self.other_tools {
                chunk["choices"][0]["finish_reason"] = json!("stop");
            }
        } else if dropped_all_calls {
            let delta_empty = chunk
                .pointer("/choices/0/delta")
                .and_then(Value::as_object)
                .map_or(true, |d| d.is_empty());
            if delta_empty {
                return out;
            }
        }

        out.push(SseEvent {
            data: chunk.to_string(),
            ..event
        });
        out
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        match self.pending.clone() {
            Some(template) => self.take_exit_content(&template).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Transformer for ToolUseTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            let obj = body_object(&mut body, NAME)?;
            let messages = take_messages(obj, NAME)?;
            let has_tools = obj
                .get("tools")
                .and_then(Value::as_array)
                .is_some_and(|tools| !tools.is_empty());
            if !has_tools {
                obj.insert("messages".into(), Value::Array(messages));
                return Ok(body);
            }

            let mut with_reminder = Vec::with_capacity(messages.len() + 1);
            with_reminder.push(json!({"role": "system", "content": TOOL_MODE_REMINDER}));
            with_reminder.extend(messages);
            obj.insert("messages".into(), Value::Array(with_reminder));

            if let Some(tools) = obj.get_mut("tools").and_then(Value::as_array_mut) {
                tools.push(exit_tool_definition());
            }
            obj.insert("tool_choice".into(), json!("required"));
            Ok(body)
        })
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if !response.status.is_success() {
            return Ok(response);
        }
        if response.is_event_stream() {
            return Ok(rewrite_event_stream(response, NAME, ExitToolStream::default()));
        }
        response
            .map_json(NAME, |mut value| {
                strip_exit_calls(&mut value);
                value
            })
            .await
    }
}
