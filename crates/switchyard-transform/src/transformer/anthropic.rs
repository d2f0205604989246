//! Anthropic Messages API.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchyard_config::Config;
use tracing::debug;

use super::utils::{body_object, content_to_string, parse_arguments, strip_provider_prefix, take_messages};
use super::Transformer;
use crate::canonical::{completion_id, tool_call_id, token_count, unix_now, usage, ChunkTemplate, FinishReasonTable, COMPLETION_OBJECT};
use crate::error::{Result, TransformError};
use crate::payload::{ProviderResponse, RequestPayload};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, rewrite_event_stream, StreamRewriter};
use crate::tools::normalize_tool;

pub const NAME: &str = "anthropic";
pub const MESSAGES_PATH: &str = "/v1/messages";
pub const API_VERSION: &str = "2023-06-01";
pub const THINKING_BUDGET_TOKENS: u64 = 16_000;

pub struct AnthropicTransformer {
    default_max_tokens: u64,
    finish_reasons: FinishReasonTable,
}

impl AnthropicTransformer {
    pub fn new(default_max_tokens: u64, finish_reasons: FinishReasonTable) -> Self {
        Self {
            default_max_tokens,
            finish_reasons,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.token_budget.default_max_tokens,
            FinishReasonTable::from_config(NAME, config),
        )
    }

    /// Canonical chat completion request -> Messages request
    fn to_messages_request(&self, mut body: Value) -> Result<Value> {
        let obj = body_object(&mut body, NAME)?;
        let messages = take_messages(obj, NAME)?;

        let model = obj
            .get("model")
            .and_then(Value::as_str)
            .map(strip_provider_prefix)
            .ok_or_else(|| TransformError::missing_field(NAME, "model"))?;

        let mut out = Map::new();
        out.insert("model".into(), json!(model));
        out.insert(
            "max_tokens".into(),
            obj.remove("max_tokens").unwrap_or_else(|| json!(self.default_max_tokens)),
        );
        for key in ["temperature", "top_p", "top_k", "stream", "metadata"] {
            if let Some(value) = obj.remove(key) {
                out.insert(key.into(), value);
            }
        }
        match obj.remove("stop") {
            Some(Value::String(stop)) => {
                out.insert("stop_sequences".into(), json!([stop]));
            }
            Some(stop @ Value::Array(_)) => {
                out.insert("stop_sequences".into(), stop);
            }
            _ => {}
        }

        let (system, converted) = convert_messages(messages)?;
        if !system.is_empty() {
            out.insert("system".into(), json!(system.join("\n\n")));
        }
        out.insert("messages".into(), Value::Array(converted));

        if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
            let tools: Vec<Value> = tools.iter().map(to_anthropic_tool).collect();
            if !tools.is_empty() {
                out.insert("tools".into(), Value::Array(tools));
            }
        }

        let mut tool_choice = obj.get("tool_choice").and_then(to_anthropic_tool_choice);
        if obj.get("parallel_tool_calls") == Some(&Value::Bool(false)) {
            let choice = tool_choice.get_or_insert_with(|| json!({"type": "auto"}));
            choice["disable_parallel_tool_use"] = json!(true);
        }
        if let Some(choice) = tool_choice {
            out.insert("tool_choice".into(), choice);
        }

        match obj.get("thinking") {
            Some(Value::Bool(true)) => {
                out.insert(
                    "thinking".into(),
                    json!({"type": "enabled", "budget_tokens": THINKING_BUDGET_TOKENS}),
                );
            }
            Some(thinking @ Value::Object(_)) => {
                out.insert("thinking".into(), thinking.clone());
            }
            _ => {}
        }

        Ok(Value::Object(out))
    }

    /// Messages response -> canonical chat completion
    fn to_chat_completion(&self, message: Value) -> Value {
        if !message.get("content").is_some_and(Value::is_array) {
            debug!("anthropic response has no content blocks, passing through");
            return message;
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut thinking: Option<Value> = None;
        for block in message["content"].as_array().into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
                Some("tool_use") => tool_calls.push(json!({
                    "id": block["id"],
                    "type": "function",
                    "function": {
                        "name": block["name"],
                        "arguments": block.get("input").unwrap_or(&json!({})).to_string(),
                    }
                })),
                Some("thinking") => {
                    thinking = Some(json!({
                        "content": block["thinking"],
                        "signature": block["signature"],
                    }));
                }
                _ => {}
            }
        }

        let content = if text.is_empty() { Value::Null } else { json!(text) };
        let mut chat_message = json!({"role": "assistant", "content": content});
        if !tool_calls.is_empty() {
            chat_message["tool_calls"] = Value::Array(tool_calls);
        }
        if let Some(thinking) = thinking {
            chat_message["thinking"] = thinking;
        }

        let finish = self
            .finish_reasons
            .map(message.get("stop_reason").and_then(Value::as_str));
        let raw_usage = message.get("usage");
        let id = message
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(completion_id);

        json!({
            "id": id,
            "object": COMPLETION_OBJECT,
            "created": unix_now(),
            "model": message["model"],
            "choices": [{
                "index": 0,
                "message": chat_message,
                "finish_reason": finish.as_str(),
            }],
            "usage": usage(
                token_count(raw_usage.and_then(|u| u.get("input_tokens"))),
                token_count(raw_usage.and_then(|u| u.get("output_tokens"))),
            ),
        })
    }
}

/// Split out system text and convert the remaining conversation.
fn convert_messages(messages: Vec<Value>) -> Result<(Vec<String>, Vec<Value>)> {
    let mut system = Vec::new();
    let mut out: Vec<Value> = Vec::new();
    let mut merging_results = false;

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
        match role {
            "system" | "developer" => {
                let text = content_to_string(&message["content"]);
                if !text.is_empty() {
                    system.push(text);
                }
                merging_results = false;
            }
            "user" => {
                out.push(json!({"role": "user", "content": convert_user_content(&message["content"])}));
                merging_results = false;
            }
            "assistant" => {
                if let Some(converted) = convert_assistant(&message) {
                    out.push(converted);
                }
                merging_results = false;
            }
            "tool" => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message["tool_call_id"],
                    "content": content_to_string(&message["content"]),
                });
                let merged = merging_results
                    && out
                        .last_mut()
                        .and_then(|last| last["content"].as_array_mut())
                        .map(|content| content.push(block.clone()))
                        .is_some();
                if !merged {
                    out.push(json!({"role": "user", "content": [block]}));
                }
                merging_results = true;
            }
            other => {
                return Err(TransformError::invalid_request(
                    NAME,
                    format!("unsupported message role '{}'", other),
                ))
            }
        }
    }

    Ok((system, out))
}

fn convert_user_content(content: &Value) -> Value {
    match content {
        Value::Array(parts) => Value::Array(parts.iter().map(convert_part).collect()),
        Value::Null => json!(""),
        other => other.clone(),
    }
}

fn convert_part(part: &Value) -> Value {
    if part.get("type").and_then(Value::as_str) != Some("image_url") {
        return part.clone();
    }
    let url = part
        .pointer("/image_url/url")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match parse_data_url(url) {
        Some((media_type, data)) => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        None => json!({
            "type": "image",
            "source": {"type": "url", "url": url},
        }),
    }
}

fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    url.strip_prefix("data:")?.split_once(";base64,")
}

fn convert_assistant(message: &Value) -> Option<Value> {
    let tool_calls = message.get("tool_calls").and_then(Value::as_array);
    let thinking = message.get("thinking").filter(|t| t.is_object());

    if tool_calls.is_none() && thinking.is_none() {
        if let Some(text) = message.get("content").and_then(Value::as_str) {
            return Some(json!({"role": "assistant", "content": text}));
        }
    }

    let mut blocks = Vec::new();
    if let Some(thinking) = thinking {
        blocks.push(json!({
            "type": "thinking",
            "thinking": thinking["content"],
            "signature": thinking["signature"],
        }));
    }
    let text = content_to_string(&message["content"]);
    if !text.is_empty() {
        blocks.push(json!({"type": "text", "text": text}));
    }
    for call in tool_calls.into_iter().flatten() {
        blocks.push(json!({
            "type": "tool_use",
            "id": call["id"],
            "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
            "input": parse_arguments(call.pointer("/function/arguments")),
        }));
    }

    if blocks.is_empty() {
        return None;
    }
    Some(json!({"role": "assistant", "content": blocks}))
}

fn to_anthropic_tool(tool: &Value) -> Value {
    let mut tool = normalize_tool(tool);
    if let Some(obj) = tool.as_object_mut() {
        obj.remove("type");
        obj.entry("input_schema")
            .or_insert_with(|| json!({"type": "object", "properties": {}}));
    }
    tool
}

fn to_anthropic_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(json!({"type": "auto"})),
            "required" | "any" => Some(json!({"type": "any"})),
            "none" => Some(json!({"type": "none"})),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .map(|name| json!({"type": "tool", "name": name})),
        _ => None,
    }
}

/// Messages request -> canonical chat completion request
fn to_chat_request(mut body: Value) -> Result<Value> {
    let obj = body_object(&mut body, NAME)?;
    let messages = take_messages(obj, NAME)?;

    let mut out = Map::new();
    for key in ["model", "max_tokens", "temperature", "top_p", "top_k", "stream", "metadata"] {
        if let Some(value) = obj.remove(key) {
            out.insert(key.into(), value);
        }
    }
    if let Some(stop) = obj.remove("stop_sequences") {
        out.insert("stop".into(), stop);
    }

    let mut chat_messages = Vec::new();
    match obj.get("system") {
        Some(Value::String(text)) => chat_messages.push(json!({"role": "system", "content": text})),
        Some(system @ Value::Array(_)) => {
            chat_messages.push(json!({"role": "system", "content": content_to_string(system)}))
        }
        _ => {}
    }

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        match (role, &message["content"]) {
            ("assistant", Value::Array(blocks)) => chat_messages.push(assistant_from_blocks(blocks)),
            ("user", Value::Array(blocks)) => {
                let mut parts = Vec::new();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_result") => chat_messages.push(json!({
                            "role": "tool",
                            "tool_call_id": block["tool_use_id"],
                            "content": content_to_string(&block["content"]),
                        })),
                        Some("image") => parts.push(image_to_part(block)),
                        _ => parts.push(block.clone()),
                    }
                }
                if !parts.is_empty() {
                    chat_messages.push(json!({"role": "user", "content": parts}));
                }
            }
            (role, content) => chat_messages.push(json!({"role": role, "content": content})),
        }
    }
    out.insert("messages".into(), Value::Array(chat_messages));

    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        let tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool["name"],
                        "description": tool["description"],
                        "parameters": tool["input_schema"],
                    }
                })
            })
            .collect();
        out.insert("tools".into(), Value::Array(tools));
    }

    if let Some(choice) = obj.get("tool_choice") {
        let mapped = match choice.get("type").and_then(Value::as_str) {
            Some("auto") => Some(json!("auto")),
            Some("any") => Some(json!("required")),
            Some("none") => Some(json!("none")),
            Some("tool") => Some(json!({"type": "function", "function": {"name": choice["name"]}})),
            _ => None,
        };
        if let Some(mapped) = mapped {
            out.insert("tool_choice".into(), mapped);
        }
        if choice.get("disable_parallel_tool_use") == Some(&Value::Bool(true)) {
            out.insert("parallel_tool_calls".into(), json!(false));
        }
    }

    if obj.get("thinking").and_then(|t| t.get("type")).and_then(Value::as_str) == Some("enabled") {
        out.insert("thinking".into(), json!(true));
    }

    Ok(Value::Object(out))
}

fn assistant_from_blocks(blocks: &[Value]) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut message = json!({"role": "assistant"});

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => tool_calls.push(json!({
                "id": block["id"],
                "type": "function",
                "function": {
                    "name": block["name"],
                    "arguments": block.get("input").unwrap_or(&json!({})).to_string(),
                }
            })),
            Some("thinking") => {
                message["thinking"] = json!({"content": block["thinking"], "signature": block["signature"]});
            }
            _ => {}
        }
    }

    message["content"] = if text.is_empty() && !tool_calls.is_empty() {
        Value::Null
    } else {
        json!(text)
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

fn image_to_part(block: &Value) -> Value {
    let source = &block["source"];
    let url = match source.get("type").and_then(Value::as_str) {
        Some("base64") => format!(
            "data:{};base64,{}",
            source["media_type"].as_str().unwrap_or("image/png"),
            source["data"].as_str().unwrap_or_default()
        ),
        _ => source["url"].as_str().unwrap_or_default().to_string(),
    };
    json!({"type": "image_url", "image_url": {"url": url}})
}

/// Messages event stream -> canonical chunk stream
struct AnthropicStream {
    finish_reasons: FinishReasonTable,
    template: ChunkTemplate,
    tool_indices: HashMap<u64, u64>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl AnthropicStream {
    fn new(finish_reasons: FinishReasonTable) -> Self {
        Self {
            finish_reasons,
            template: ChunkTemplate::new(completion_id(), ""),
            tool_indices: HashMap::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    fn delta(&self, delta: Value) -> Vec<SseEvent> {
        vec![SseEvent::json(&self.template.chunk(0, delta, None))]
    }

    fn tool_index(&self, event: &Value) -> u64 {
        let block = event.get("index").and_then(Value::as_u64).unwrap_or(0);
        self.tool_indices.get(&block).copied().unwrap_or(0)
    }
}

impl StreamRewriter for AnthropicStream {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if event.is_done() {
            return Vec::new();
        }
        let Some(data) = parse_event_json(&event, NAME) else {
            return vec![event];
        };

        match data.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let message = &data["message"];
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    self.template.id = id.to_string();
                }
                if let Some(model) = message.get("model").and_then(Value::as_str) {
                    self.template.model = model.to_string();
                }
                self.prompt_tokens = token_count(message.pointer("/usage/input_tokens"));
                self.delta(json!({"role": "assistant", "content": ""}))
            }
            Some("content_block_start") => {
                let block = &data["content_block"];
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let tool_index = self.tool_indices.len() as u64;
                        let block_index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
                        self.tool_indices.insert(block_index, tool_index);
                        let id = block
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(tool_call_id);
                        self.delta(json!({"tool_calls": [{
                            "index": tool_index,
                            "id": id,
                            "type": "function",
                            "function": {"name": block["name"], "arguments": ""},
                        }]}))
                    }
                    Some("text") => match block.get("text").and_then(Value::as_str) {
                        Some(text) if !text.is_empty() => self.delta(json!({"content": text})),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                }
            }
            Some("content_block_delta") => {
                let delta = &data["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => self.delta(json!({"content": delta["text"]})),
                    Some("input_json_delta") => self.delta(json!({"tool_calls": [{
                        "index": self.tool_index(&data),
                        "function": {"arguments": delta["partial_json"]},
                    }]})),
                    Some("thinking_delta") => self.delta(json!({"thinking": {"content": delta["thinking"]}})),
                    Some("signature_delta") => self.delta(json!({"thinking": {"signature": delta["signature"]}})),
                    _ => Vec::new(),
                }
            }
            Some("message_delta") => {
                if let Some(output) = data.pointer("/usage/output_tokens") {
                    self.completion_tokens = token_count(Some(output));
                }
                let finish = self
                    .finish_reasons
                    .map(data.pointer("/delta/stop_reason").and_then(Value::as_str));
                vec![SseEvent::json(&self.template.chunk(0, json!({}), Some(finish.as_str())))]
            }
            Some("message_stop") => {
                let chunk = json!({
                    "id": self.template.id,
                    "object": crate::canonical::CHUNK_OBJECT,
                    "created": self.template.created,
                    "model": self.template.model,
                    "choices": [],
                    "usage": usage(self.prompt_tokens, self.completion_tokens),
                });
                vec![SseEvent::json(&chunk)]
            }
            Some("error") => vec![SseEvent::json(&json!({"error": data["error"]}))],
            Some("ping") | Some("content_block_stop") => Vec::new(),
            other => {
                debug!(event_type = ?other, "ignoring unknown anthropic stream event");
                Vec::new()
            }
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        vec![SseEvent::done()]
    }
}

#[async_trait]
impl Transformer for AnthropicTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(MESSAGES_PATH)
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        let mut config = request.into_config();
        config.body = self.to_messages_request(config.body)?;
        Ok(config
            .with_url(MESSAGES_PATH)
            .with_header("anthropic-version", API_VERSION)
            .into())
    }

    fn transform_request_out(&self, request: RequestPayload) -> Result<RequestPayload> {
        Ok(RequestPayload::Body(to_chat_request(request.into_body())?))
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if response.status.is_success() && response.is_event_stream() {
            let rewriter = AnthropicStream::new(self.finish_reasons.clone());
            return Ok(rewrite_event_stream(response, NAME, rewriter));
        }
        response
            .map_json(NAME, |message| self.to_chat_completion(message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn transformer() -> AnthropicTransformer {
        AnthropicTransformer::from_config(&Config::default())
    }

    fn request_body(payload: RequestPayload) -> (Value, Option<String>) {
        let config = payload.into_config();
        let version = config
            .headers
            .get("anthropic-version")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        (config.body, version)
    }

    #[test]
    fn test_request_conversion() {
        let body = json!({
            "model": "anthropic,claude-sonnet-4",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "system", "content": "Be kind."},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "lookup", "arguments": "oops"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "one"},
                {"role": "tool", "tool_call_id": "call_2", "content": "two"}
            ],
            "stop": "END",
            "temperature": 0.3,
            "tool_choice": "required",
            "thinking": true
        });

        let (out, version) = request_body(transformer().transform_request_in(RequestPayload::Body(body), NAME).unwrap());

        assert_eq!(version.as_deref(), Some(API_VERSION));
        assert_eq!(out["model"], "claude-sonnet-4");
        assert_eq!(out["system"], "Be brief.\n\nBe kind.");
        assert_eq!(out["max_tokens"], 4096);
        assert_eq!(out["stop_sequences"], json!(["END"]));
        assert_eq!(out["tool_choice"], json!({"type": "any"}));
        assert_eq!(out["thinking"], json!({"type": "enabled", "budget_tokens": 16000}));

        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0]["content"][1],
            json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}})
        );
        assert_eq!(messages[1]["content"][0]["input"], json!({"q": "x"}));
        assert_eq!(messages[1]["content"][1]["input"], json!({}));
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "call_2");
    }

    #[test]
    fn test_missing_messages_is_an_error() {
        let err = transformer()
            .transform_request_in(RequestPayload::Body(json!({"model": "claude"})), NAME)
            .unwrap_err();
        assert_eq!(err.to_string(), "anthropic: missing required field 'messages'");

        let err = transformer()
            .transform_request_in(RequestPayload::Body(json!({"messages": []})), NAME)
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingField { ref field, .. } if field == "model"));
    }

    #[test]
    fn test_messages_request_back_to_canonical() {
        let body = json!({
            "model": "claude-sonnet-4",
            "max_tokens": 512,
            "system": "sys",
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 2048}
        });
        let out = transformer()
            .transform_request_out(RequestPayload::Body(body))
            .unwrap()
            .into_body();
        assert_eq!(out["thinking"], true);
        assert_eq!(out["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(out["max_tokens"], 512);
    }

    #[test]
    fn test_named_tool_choice() {
        assert_eq!(
            to_anthropic_tool_choice(&json!({"type": "function", "function": {"name": "f"}})),
            Some(json!({"type": "tool", "name": "f"}))
        );
        assert_eq!(to_anthropic_tool_choice(&json!("none")), Some(json!({"type": "none"})));
    }

    #[tokio::test]
    async fn test_buffered_response() {
        let message = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "text", "text": "Let me check. "},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10}
        });
        let response = ProviderResponse::json(StatusCode::OK, &message).unwrap();
        let out = transformer().transform_response_out(response).await.unwrap();
        let body: Value = serde_json::from_str(&out.text().await.unwrap()).unwrap();

        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["id"], "msg_1");
        let choice = &body["choices"][0];
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert_eq!(choice["message"]["content"], "Let me check. ");
        assert_eq!(choice["message"]["thinking"]["content"], "hmm");
        assert_eq!(choice["message"]["tool_calls"][0]["function"]["arguments"], "{\"q\":\"x\"}");
        assert_eq!(body["usage"], json!({"prompt_tokens": 10, "completion_tokens": 0, "total_tokens": 10}));
    }

    #[tokio::test]
    async fn test_non_json_response_passes_through() {
        let head = crate::payload::ResponseHead {
            status: StatusCode::OK,
            headers: http::HeaderMap::new(),
        };
        let response = head.with_bytes(bytes::Bytes::from_static(b"upstream exploded"));
        let out = transformer().transform_response_out(response).await.unwrap();
        assert_eq!(out.text().await.unwrap(), "upstream exploded");
    }

    #[tokio::test]
    async fn test_streaming_response() {
        let upstream = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_9\",\"model\":\"claude\",\"usage\":{\"input_tokens\":5}}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"f\",\"input\":{}}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{}\"}}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let out = transformer()
            .transform_response_out(ProviderResponse::event_stream(upstream.as_bytes()))
            .await
            .unwrap();
        let text = out.text().await.unwrap();

        let events: Vec<&str> = text.split("\n\n").filter(|e| !e.is_empty()).collect();
        assert_eq!(events.len(), 7);
        let chunks: Vec<Value> = events[..6]
            .iter()
            .map(|e| serde_json::from_str(e.trim_start_matches("data: ")).unwrap())
            .collect();

        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[0]["id"], "msg_9");
        assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(chunks[2]["choices"][0]["delta"]["tool_calls"][0]["id"], "toolu_1");
        assert_eq!(chunks[3]["choices"][0]["delta"]["tool_calls"][0]["index"], 0);
        assert_eq!(chunks[4]["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(chunks[5]["usage"]["total_tokens"], 8);
        assert_eq!(events[6], "data: [DONE]");
        assert!(!text.contains("event:"));
    }
}
