//! Google Gemini `generateContent` API.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchyard_config::Config;
use tracing::debug;

use super::utils::{body_object, clean_schema, content_to_string, parse_arguments, strip_provider_prefix, take_messages};
use super::Transformer;
use crate::canonical::{completion_id, token_count, tool_call_id, unix_now, usage, ChunkTemplate, FinishReason, FinishReasonTable, COMPLETION_OBJECT};
use crate::error::{Result, TransformError};
use crate::payload::{ProviderResponse, RequestPayload};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, rewrite_event_stream, StreamRewriter};
use crate::tools::{normalize_tool, tool_call_names};

pub const NAME: &str = "gemini";
pub const ENDPOINT: &str = "/v1beta/models/:modelAndAction";

/// Canonical sampling field -> `generationConfig` field
const GENERATION_FIELDS: [(&str, &str); 8] = [
    ("temperature", "temperature"),
    ("top_p", "topP"),
    ("top_k", "topK"),
    ("max_tokens", "maxOutputTokens"),
    ("n", "candidateCount"),
    ("presence_penalty", "presencePenalty"),
    ("frequency_penalty", "frequencyPenalty"),
    ("seed", "seed"),
];

pub struct GeminiTransformer {
    finish_reasons: FinishReasonTable,
}

impl GeminiTransformer {
    pub fn new(finish_reasons: FinishReasonTable) -> Self {
        Self { finish_reasons }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(FinishReasonTable::from_config(NAME, config))
    }

    fn finish_reason(&self, raw: Option<&str>, called_tools: bool) -> FinishReason {
        let reason = self.finish_reasons.map(raw);
        if called_tools && reason == FinishReason::Stop {
            FinishReason::ToolCalls
        } else {
            reason
        }
    }

    fn to_chat_completion(&self, response: Value) -> Value {
        if !response.get("candidates").is_some_and(Value::is_array) {
            debug!("gemini response has no candidates, passing through");
            return response;
        }

        let choices: Vec<Value> = response["candidates"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, candidate)| {
                let parts = CandidateParts::from_candidate(candidate, &mut |_| tool_call_id());
                let called_tools = !parts.tool_calls.is_empty();
                let content = if parts.text.is_empty() { Value::Null } else { json!(parts.text) };
                let mut message = json!({"role": "assistant", "content": content});
                if called_tools {
                    message["tool_calls"] = Value::Array(parts.tool_calls);
                }
                if !parts.thinking.is_empty() {
                    message["thinking"] = json!({"content": parts.thinking});
                }
                let finish = self.finish_reason(candidate.get("finishReason").and_then(Value::as_str), called_tools);
                json!({
                    "index": candidate.get("index").and_then(Value::as_u64).unwrap_or(i as u64),
                    "message": message,
                    "finish_reason": finish.as_str(),
                })
            })
            .collect();

        let id = response
            .get("responseId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(completion_id);

        json!({
            "id": id,
            "object": COMPLETION_OBJECT,
            "created": unix_now(),
            "model": response.get("modelVersion").cloned().unwrap_or(Value::Null),
            "choices": choices,
            "usage": usage_from_metadata(response.get("usageMetadata")),
        })
    }
}

fn usage_from_metadata(metadata: Option<&Value>) -> Value {
    usage(
        token_count(metadata.and_then(|m| m.get("promptTokenCount"))),
        token_count(metadata.and_then(|m| m.get("candidatesTokenCount"))),
    )
}

/// Text, thoughts and function calls of one model turn
struct CandidateParts {
    text: String,
    thinking: String,
    tool_calls: Vec<Value>,
}

impl CandidateParts {
    fn from_candidate(candidate: &Value, next_id: &mut dyn FnMut(&str) -> String) -> Self {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Self::collect(parts, next_id)
    }

    /// `next_id` names function calls that arrive without an id.
    fn collect(parts: &[Value], next_id: &mut dyn FnMut(&str) -> String) -> Self {
        let mut collected = Self {
            text: String::new(),
            thinking: String::new(),
            tool_calls: Vec::new(),
        };

        for part in parts {
            if let Some(call) = part.get("functionCall") {
                let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| next_id(name));
                collected.tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": call.get("args").cloned().unwrap_or_else(|| json!({})).to_string(),
                    }
                }));
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool) == Some(true) {
                    collected.thinking.push_str(text);
                } else {
                    collected.text.push_str(text);
                }
            }
        }
        collected
    }
}

/// Canonical chat completion request -> `generateContent` request
fn to_generate_content(mut body: Value) -> Result<(String, bool, Value)> {
    let obj = body_object(&mut body, NAME)?;
    let messages = take_messages(obj, NAME)?;
    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(|m| strip_provider_prefix(m).to_string())
        .ok_or_else(|| TransformError::missing_field(NAME, "model"))?;
    let stream = obj.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let names = tool_call_names(&messages);
    let mut system_parts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    let mut merging_responses = false;

    for message in &messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or_default();
        match role {
            "system" | "developer" => {
                let text = content_to_string(&message["content"]);
                if !text.is_empty() {
                    system_parts.push(json!({"text": text}));
                }
                merging_responses = false;
            }
            "user" => {
                contents.push(json!({"role": "user", "parts": content_parts(&message["content"])}));
                merging_responses = false;
            }
            "assistant" => {
                let mut parts = content_parts(&message["content"]);
                for call in message.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
                    parts.push(json!({"functionCall": {
                        "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                        "args": parse_arguments(call.pointer("/function/arguments")),
                    }}));
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                merging_responses = false;
            }
            "tool" => {
                let call_id = message.get("tool_call_id").and_then(Value::as_str).unwrap_or_default();
                let name = names.get(call_id).cloned().unwrap_or_else(|| {
                    debug!(tool_call_id = call_id, "tool result without a matching call");
                    String::new()
                });
                let part = json!({"functionResponse": {
                    "name": name,
                    "response": function_response(&message["content"]),
                }});
                let merged = merging_responses
                    && contents
                        .last_mut()
                        .and_then(|last| last["parts"].as_array_mut())
                        .map(|parts| parts.push(part.clone()))
                        .is_some();
                if !merged {
                    contents.push(json!({"role": "user", "parts": [part]}));
                }
                merging_responses = true;
            }
            other => {
                return Err(TransformError::invalid_request(
                    NAME,
                    format!("unsupported message role '{}'", other),
                ))
            }
        }
    }

    let mut out = Map::new();
    out.insert("contents".into(), Value::Array(contents));
    if !system_parts.is_empty() {
        out.insert("systemInstruction".into(), json!({"parts": system_parts}));
    }

    let mut generation = Map::new();
    for (from, to) in GENERATION_FIELDS {
        if let Some(value) = obj.remove(from) {
            generation.insert(to.into(), value);
        }
    }
    match obj.remove("stop") {
        Some(Value::String(stop)) => {
            generation.insert("stopSequences".into(), json!([stop]));
        }
        Some(stop @ Value::Array(_)) => {
            generation.insert("stopSequences".into(), stop);
        }
        _ => {}
    }
    if !generation.is_empty() {
        out.insert("generationConfig".into(), Value::Object(generation));
    }

    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        let declarations: Vec<Value> = tools.iter().map(function_declaration).collect();
        if !declarations.is_empty() {
            out.insert("tools".into(), json!([{"functionDeclarations": declarations}]));
        }
    }
    if let Some(config) = obj.get("tool_choice").and_then(function_calling_config) {
        out.insert("toolConfig".into(), json!({"functionCallingConfig": config}));
    }

    Ok((model, stream, Value::Object(out)))
}

fn content_parts(content: &Value) -> Vec<Value> {
    match content {
        Value::String(text) if !text.is_empty() => vec![json!({"text": text})],
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part.get("type").and_then(Value::as_str) {
                Some("text") => Some(json!({"text": part["text"]})),
                Some("image_url") => {
                    let url = part.pointer("/image_url/url").and_then(Value::as_str)?;
                    Some(image_part(url))
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn image_part(url: &str) -> Value {
    if let Some((mime_type, data)) = url.strip_prefix("data:").and_then(|u| u.split_once(";base64,")) {
        return json!({"inlineData": {"mimeType": mime_type, "data": data}});
    }
    let lower = url.to_lowercase();
    let mime_type = if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else {
        "image/jpeg"
    };
    json!({"fileData": {"mimeType": mime_type, "fileUri": url}})
}

/// `functionResponse.response` must be an object.
fn function_response(content: &Value) -> Value {
    let text = content_to_string(content);
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({"content": text}),
    }
}

fn function_declaration(tool: &Value) -> Value {
    let tool = normalize_tool(tool);
    let mut declaration = json!({
        "name": tool["name"],
        "description": tool.get("description").cloned().unwrap_or_else(|| json!("")),
    });
    if let Some(schema) = tool.get("input_schema") {
        let has_properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|p| !p.is_empty());
        if has_properties {
            let mut schema = schema.clone();
            clean_schema(&mut schema);
            declaration["parameters"] = schema;
        }
    }
    declaration
}

fn function_calling_config(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(json!({"mode": "AUTO"})),
            "required" | "any" => Some(json!({"mode": "ANY"})),
            "none" => Some(json!({"mode": "NONE"})),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .map(|name| json!({"mode": "ANY", "allowedFunctionNames": [name]})),
        _ => None,
    }
}

fn request_url(model: &str, stream: bool) -> String {
    if stream {
        format!("/v1beta/models/{}:streamGenerateContent?alt=sse", model)
    } else {
        format!("/v1beta/models/{}:generateContent", model)
    }
}

/// Model name and streaming flag encoded in a request URL
fn parse_request_url(url: &str) -> Option<(String, bool)> {
    let rest = &url[url.find("models/")? + "models/".len()..];
    let (model, action) = rest.split_once(':')?;
    Some((model.to_string(), action.starts_with("streamGenerateContent")))
}

/// `generateContent` request -> canonical chat completion request
fn to_chat_request(mut body: Value, url: Option<&str>) -> Result<Value> {
    let obj = body_object(&mut body, NAME)?;
    let contents = match obj.remove("contents") {
        Some(Value::Array(contents)) => contents,
        _ => return Err(TransformError::missing_field(NAME, "contents")),
    };

    let mut out = Map::new();
    if let Some((model, stream)) = url.and_then(parse_request_url) {
        out.insert("model".into(), json!(model));
        if stream {
            out.insert("stream".into(), json!(true));
        }
    }

    let mut messages = Vec::new();
    let system = obj.get("systemInstruction").and_then(|s| s.get("parts"));
    if let Some(parts) = system.and_then(Value::as_array) {
        let text: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        messages.push(json!({"role": "system", "content": text.join("\n\n")}));
    }

    let mut pending_ids: HashMap<String, Vec<String>> = HashMap::new();
    for content in &contents {
        let parts = content["parts"].as_array().map(Vec::as_slice).unwrap_or_default();
        if content["role"] == "model" {
            let collected = CandidateParts::collect(parts, &mut |name| {
                let id = tool_call_id();
                pending_ids.entry(name.to_string()).or_default().push(id.clone());
                id
            });
            let mut message = json!({"role": "assistant", "content": collected.text});
            if !collected.tool_calls.is_empty() {
                if collected.text.is_empty() {
                    message["content"] = Value::Null;
                }
                message["tool_calls"] = Value::Array(collected.tool_calls);
            }
            messages.push(message);
            continue;
        }

        let mut texts = Vec::new();
        for part in parts {
            if let Some(response) = part.get("functionResponse") {
                let name = response["name"].as_str().unwrap_or_default();
                let id = pending_ids
                    .get_mut(name)
                    .filter(|ids| !ids.is_empty())
                    .map(|ids| ids.remove(0))
                    .unwrap_or_default();
                let payload = &response["response"];
                let content = match payload.get("content") {
                    Some(Value::String(text)) if payload.as_object().map(Map::len) == Some(1) => text.clone(),
                    _ => payload.to_string(),
                };
                messages.push(json!({"role": "tool", "tool_call_id": id, "content": content}));
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text);
            }
        }
        if !texts.is_empty() {
            messages.push(json!({"role": "user", "content": texts.join("")}));
        }
    }
    out.insert("messages".into(), Value::Array(messages));

    if let Some(generation) = obj.get("generationConfig").and_then(Value::as_object) {
        for (to, from) in GENERATION_FIELDS {
            if let Some(value) = generation.get(from) {
                out.insert(to.into(), value.clone());
            }
        }
        if let Some(stop) = generation.get("stopSequences") {
            out.insert("stop".into(), stop.clone());
        }
    }

    let declarations = obj
        .get("tools")
        .and_then(|t| t.pointer("/0/functionDeclarations"))
        .and_then(Value::as_array);
    if let Some(declarations) = declarations {
        let tools: Vec<Value> = declarations
            .iter()
            .map(|d| {
                let parameters = d
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                json!({"type": "function", "function": {
                    "name": d["name"],
                    "description": d["description"],
                    "parameters": parameters,
                }})
            })
            .collect();
        out.insert("tools".into(), Value::Array(tools));
    }

    if let Some(config) = obj.get("toolConfig").and_then(|t| t.get("functionCallingConfig")) {
        let choice = match (config["mode"].as_str(), config.pointer("/allowedFunctionNames/0")) {
            (Some("ANY"), Some(name)) => Some(json!({"type": "function", "function": {"name": name}})),
            (Some("ANY"), None) => Some(json!("required")),
            (Some("AUTO"), _) => Some(json!("auto")),
            (Some("NONE"), _) => Some(json!("none")),
            _ => None,
        };
        if let Some(choice) = choice {
            out.insert("tool_choice".into(), choice);
        }
    }

    Ok(Value::Object(out))
}

/// `streamGenerateContent` events -> canonical chunk stream
struct GeminiStream {
    finish_reasons: FinishReasonTable,
    template: Option<ChunkTemplate>,
    role_sent: bool,
    next_tool_index: u64,
    called_tools: bool,
}

impl GeminiStream {
    fn new(finish_reasons: FinishReasonTable) -> Self {
        Self {
            finish_reasons,
            template: None,
            role_sent: false,
            next_tool_index: 0,
            called_tools: false,
        }
    }
}

impl StreamRewriter for GeminiStream {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if event.is_done() {
            return Vec::new();
        }
        let Some(data) = parse_event_json(&event, NAME) else {
            return vec![event];
        };
        let Some(candidates) = data.get("candidates").and_then(Value::as_array) else {
            return vec![event];
        };

        let template = self
            .template
            .get_or_insert_with(|| {
                let id = data
                    .get("responseId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(completion_id);
                ChunkTemplate::new(id, data["modelVersion"].as_str().unwrap_or_default())
            })
            .clone();

        let mut out = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let parts = CandidateParts::from_candidate(candidate, &mut |_| tool_call_id());

            let mut delta = Map::new();
            if !self.role_sent {
                delta.insert("role".into(), json!("assistant"));
                self.role_sent = true;
            }
            if !parts.text.is_empty() {
                delta.insert("content".into(), json!(parts.text));
            }
            if !parts.thinking.is_empty() {
                delta.insert("thinking".into(), json!({"content": parts.thinking}));
            }
            if !parts.tool_calls.is_empty() {
                self.called_tools = true;
                let calls: Vec<Value> = parts
                    .tool_calls
                    .into_iter()
                    .map(|mut call| {
                        call["index"] = json!(self.next_tool_index);
                        self.next_tool_index += 1;
                        call
                    })
                    .collect();
                delta.insert("tool_calls".into(), Value::Array(calls));
            }

            let raw_finish = candidate.get("finishReason").and_then(Value::as_str);
            let finish = raw_finish.map(|raw| {
                let reason = self.finish_reasons.map(Some(raw));
                if self.called_tools && reason == FinishReason::Stop {
                    FinishReason::ToolCalls
                } else {
                    reason
                }
            });

            let index = candidate.get("index").and_then(Value::as_u64).unwrap_or(i as u64);
            let mut chunk = template.chunk(index, Value::Object(delta), finish.map(|f| f.as_str()));
            if finish.is_some() {
                if let Some(metadata) = data.get("usageMetadata") {
                    chunk["usage"] = usage_from_metadata(Some(metadata));
                }
            }
            out.push(SseEvent::json(&chunk));
        }
        out
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        vec![SseEvent::done()]
    }
}

#[async_trait]
impl Transformer for GeminiTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(ENDPOINT)
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        let mut config = request.into_config();
        let (model, stream, body) = to_generate_content(config.body)?;
        config.body = body;
        Ok(config.with_url(request_url(&model, stream)).into())
    }

    fn transform_request_out(&self, request: RequestPayload) -> Result<RequestPayload> {
        let config = request.into_config();
        let body = to_chat_request(config.body, config.url.as_deref())?;
        Ok(RequestPayload::Body(body))
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if response.status.is_success() && response.is_event_stream() {
            let rewriter = GeminiStream::new(self.finish_reasons.clone());
            return Ok(rewrite_event_stream(response, NAME, rewriter));
        }
        response
            .map_json(NAME, |value| self.to_chat_completion(value))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn transformer() -> GeminiTransformer {
        GeminiTransformer::from_config(&Config::default())
    }

    fn weather_tool() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Weather lookup",
                "parameters": {
                    "$schema": "http://json-schema.org/draft-07/schema#",
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {"city": {"type": "string"}}
                }
            }
        })
    }

    #[test]
    fn test_request_conversion() {
        let body = json!({
            "model": "gemini-2.0-flash",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Answer in French."},
                {"role": "user", "content": "Weather in Paris?"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "{\"temp\": 21}"}
            ],
            "temperature": 0.4,
            "max_tokens": 256,
            "tools": [weather_tool()],
            "tool_choice": {"type": "function", "function": {"name": "get_weather"}}
        });

        let config = transformer()
            .transform_request_in(RequestPayload::Body(body), NAME)
            .unwrap()
            .into_config();

        assert_eq!(config.url.as_deref(), Some("/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
        let out = config.body;
        assert!(out.get("messages").is_none());
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "Answer in French.");
        assert_eq!(out["contents"][1]["role"], "model");
        assert_eq!(out["contents"][1]["parts"][0]["functionCall"]["args"], json!({"city": "Paris"}));
        assert_eq!(out["contents"][2]["parts"][0]["functionResponse"]["name"], "get_weather");
        assert_eq!(out["contents"][2]["parts"][0]["functionResponse"]["response"], json!({"temp": 21}));
        assert_eq!(out["generationConfig"], json!({"temperature": 0.4, "maxOutputTokens": 256}));

        let parameters = &out["tools"][0]["functionDeclarations"][0]["parameters"];
        assert!(parameters.get("$schema").is_none());
        assert!(parameters.get("additionalProperties").is_none());
        assert_eq!(
            out["toolConfig"]["functionCallingConfig"],
            json!({"mode": "ANY", "allowedFunctionNames": ["get_weather"]})
        );
    }

    #[test]
    fn test_missing_fields() {
        let err = transformer()
            .transform_request_in(RequestPayload::Body(json!({"model": "gemini-pro"})), NAME)
            .unwrap_err();
        assert!(err.to_string().contains("'messages'"));

        let err = transformer()
            .transform_request_in(RequestPayload::Body(json!({"messages": []})), NAME)
            .unwrap_err();
        assert!(err.to_string().contains("'model'"));
    }

    #[test]
    fn test_round_trip_keeps_model_order_and_tools() {
        let body = json!({
            "model": "gemini-1.5-pro",
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "one"},
                {"role": "assistant", "content": "two"},
                {"role": "user", "content": "three"}
            ],
            "tools": [weather_tool()],
            "tool_choice": "required"
        });
        let t = transformer();
        let vendor = t.transform_request_in(RequestPayload::Body(body), NAME).unwrap();
        let back = t.transform_request_out(vendor).unwrap().into_body();

        assert_eq!(back["model"], "gemini-1.5-pro");
        let contents: Vec<&str> = back["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["sys", "one", "two", "three"]);
        assert_eq!(back["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(back["tools"][0]["function"]["parameters"]["properties"]["city"]["type"], "string");
        assert_eq!(back["tool_choice"], "required");
    }

    #[tokio::test]
    async fn test_buffered_response() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Sunny"},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                ]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10},
            "modelVersion": "gemini-2.0-flash"
        });
        let out = transformer()
            .transform_response_out(ProviderResponse::json(StatusCode::OK, &response).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&out.text().await.unwrap()).unwrap();

        let choice = &body["choices"][0];
        assert_eq!(choice["message"]["content"], "Sunny");
        assert_eq!(choice["message"]["thinking"]["content"], "thinking...");
        assert_eq!(choice["message"]["tool_calls"][0]["function"]["arguments"], "{\"city\":\"Paris\"}");
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert_eq!(body["usage"]["total_tokens"], 10);
        assert_eq!(body["model"], "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn test_streaming_response() {
        let upstream = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Bon\"}]},\"index\":0}],\"modelVersion\":\"gemini-2.0-flash\"}\n\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"jour\"}]},\"finishReason\":\"MAX_TOKENS\",\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":2,\"candidatesTokenCount\":2}}\n\n",
        );
        let out = transformer()
            .transform_response_out(ProviderResponse::event_stream(upstream.as_bytes()))
            .await
            .unwrap();
        let text = out.text().await.unwrap();
        let events: Vec<&str> = text.split("\n\n").filter(|e| !e.is_empty()).collect();
        assert_eq!(events.len(), 3);

        let first: Value = serde_json::from_str(events[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(first["choices"][0]["delta"], json!({"role": "assistant", "content": "Bon"}));
        assert_eq!(first["model"], "gemini-2.0-flash");

        let second: Value = serde_json::from_str(events[1].trim_start_matches("data: ")).unwrap();
        assert_eq!(second["choices"][0]["finish_reason"], "length");
        assert_eq!(second["usage"]["total_tokens"], 4);
        assert_eq!(second["id"], first["id"]);
        assert_eq!(events[2], "data: [DONE]");
    }
}
