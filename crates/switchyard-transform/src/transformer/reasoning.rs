//! Reasoning delta normalization shared by DeepSeek and OpenRouter.
//!
//! Vendors stream chain-of-thought under `reasoning_content` or `reasoning`.
//! Downstream every such delta becomes a `thinking` delta. When the model
//! moves on to content, tool calls or a finish, the collected text is emitted
//! once as a signed block and all later chunks move to the next choice index.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::canonical::{completion_id, ChunkTemplate};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, StreamRewriter};

const REASONING_KEYS: [&str; 2] = ["reasoning_content", "reasoning"];

/// Remove every reasoning key from `map`, returning the first non-empty text.
pub fn take_reasoning(map: &mut Map<String, Value>) -> Option<String> {
    let mut found = None;
    for key in REASONING_KEYS {
        if let Some(Value::String(text)) = map.remove(key) {
            if found.is_none() && !text.is_empty() {
                found = Some(text);
            }
        }
    }
    found
}

/// Buffered variant: move reasoning on every choice message to `message.thinking`.
pub fn reasoning_to_thinking(response: &mut Value) {
    let Some(choices) = response.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) else {
            continue;
        };
        if let Some(reasoning) = take_reasoning(message) {
            message.insert("thinking".to_string(), json!({ "content": reasoning }));
        }
    }
}

/// Per-stream state for the reasoning transition.
pub struct ReasoningStream {
    transformer: &'static str,
    reasoning: String,
    flushed: bool,
    index: u64,
    template: Option<ChunkTemplate>,
}

impl ReasoningStream {
    pub fn new(transformer: &'static str) -> Self {
        Self {
            transformer,
            reasoning: String::new(),
            flushed: false,
            index: 0,
            template: None,
        }
    }

    fn remember_template(&mut self, chunk: &Value) {
        let id = chunk.get("id").and_then(Value::as_str);
        let model = chunk.get("model").and_then(Value::as_str);
        if id.is_none() && model.is_none() {
            return;
        }
        let mut template = ChunkTemplate::new(
            id.map(str::to_string).unwrap_or_else(completion_id),
            model.unwrap_or_default(),
        );
        if let Some(created) = chunk.get("created").and_then(Value::as_i64) {
            template.created = created;
        }
        self.template = Some(template);
    }

    fn template(&mut self) -> &ChunkTemplate {
        self.template
            .get_or_insert_with(|| ChunkTemplate::new(completion_id(), ""))
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.flushed || self.reasoning.is_empty() {
            return None;
        }
        let content = std::mem::take(&mut self.reasoning);
        let signature = chrono::Utc::now().timestamp().to_string();
        let index = self.index;
        let chunk = self.template().chunk(
            index,
            json!({ "content": content, "signature": signature }),
            None,
        );
        self.flushed = true;
        self.index += 1;
        debug!(transformer = self.transformer, next_index = self.index, "flushed reasoning block");
        Some(SseEvent::json(&chunk))
    }

    fn renumber(&self, choice: &mut Map<String, Value>) {
        choice.insert("index".to_string(), json!(self.index));
        let calls = choice
            .get_mut("delta")
            .and_then(|d| d.get_mut("tool_calls"))
            .and_then(Value::as_array_mut);
        if let Some(calls) = calls {
            for call in calls {
                let original = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                call["index"] = json!(original + self.index);
            }
        }
    }
}

impl StreamRewriter for ReasoningStream {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        // The terminator is re-emitted once the stream ends.
        if event.is_done() {
            return Vec::new();
        }
        let Some(mut chunk) = parse_event_json(&event, self.transformer) else {
            return vec![event];
        };
        self.remember_template(&chunk);

        if !chunk.pointer("/choices/0").is_some_and(Value::is_object) {
            return vec![SseEvent { data: chunk.to_string(), ..event }];
        }
        let Some(choice) = chunk
            .pointer_mut("/choices/0")
            .and_then(Value::as_object_mut)
        else {
            return Vec::new();
        };

        let reasoning = choice
            .get_mut("delta")
            .and_then(Value::as_object_mut)
            .and_then(take_reasoning);

        let delta = choice.get("delta").and_then(Value::as_object);
        let has_content = delta
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .is_some_and(|c| !c.is_empty());
        let has_tool_calls = delta
            .and_then(|d| d.get("tool_calls"))
            .and_then(Value::as_array)
            .is_some_and(|calls| !calls.is_empty());
        let finished = choice.get("finish_reason").is_some_and(|r| !r.is_null());
        let transition = has_content || has_tool_calls || finished;

        let mut out = Vec::new();
        if let Some(text) = reasoning {
            if !self.flushed {
                self.reasoning.push_str(&text);
            }
            let thinking = json!({ "content": text });
            if !transition {
                // Same chunk, reasoning swapped for thinking.
                if let Some(delta) = choice.get_mut("delta").and_then(Value::as_object_mut) {
                    delta.insert("thinking".to_string(), thinking);
                }
                self.renumber(choice);
                return vec![SseEvent { data: chunk.to_string(), ..event }];
            }
            let index = self.index;
            let split = self.template().chunk(index, json!({ "thinking": thinking }), None);
            out.push(SseEvent::json(&split));
        }

        if transition {
            out.extend(self.flush());
        }

        self.renumber(choice);
        out.push(SseEvent {
            data: chunk.to_string(),
            ..event
        });
        out
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let mut out: Vec<SseEvent> = self.flush().into_iter().collect();
        out.push(SseEvent::done());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_chunk(delta: Value, finish: Option<&str>) -> SseEvent {
        SseEvent::json(&json!({
            "id": "chatcmpl-r",
            "object": "chat.completion.chunk",
            "created": 7,
            "model": "deepseek-reasoner",
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
        }))
    }

    fn run(events: Vec<SseEvent>) -> Vec<SseEvent> {
        let mut stream = ReasoningStream::new("test");
        let mut out: Vec<SseEvent> = events.into_iter().flat_map(|e| stream.rewrite(e)).collect();
        out.extend(stream.finish());
        out
    }

    #[test]
    fn test_tool_call_indices_shift_after_flush() {
        let out = run(vec![
            delta_chunk(json!({"reasoning_content": "plan"}), None),
            delta_chunk(
                json!({"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "f", "arguments": ""}}]}),
                None,
            ),
            delta_chunk(json!({}), Some("tool_calls")),
        ]);

        assert_eq!(out.len(), 5);
        let flush = out[1].parse_json().unwrap();
        assert_eq!(flush["choices"][0]["delta"]["content"], "plan");
        assert_eq!(flush["choices"][0]["index"], 0);
        assert!(flush["choices"][0]["delta"]["signature"].is_string());

        let call = out[2].parse_json().unwrap();
        assert_eq!(call["choices"][0]["index"], 1);
        assert_eq!(call["choices"][0]["delta"]["tool_calls"][0]["index"], 1);

        let finish = out[3].parse_json().unwrap();
        assert_eq!(finish["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(finish["choices"][0]["index"], 1);
        assert!(out[4].is_done());
    }

    #[test]
    fn test_reasoning_delta_keeps_other_fields() {
        let out = run(vec![
            delta_chunk(json!({"role": "assistant", "reasoning_content": "think"}), None),
            delta_chunk(json!({"content": "answer"}), None),
        ]);

        let first = out[0].parse_json().unwrap();
        assert_eq!(
            first["choices"][0]["delta"],
            json!({"role": "assistant", "thinking": {"content": "think"}})
        );
        assert_eq!(first["choices"][0]["index"], 0);
        assert_eq!(first["model"], "deepseek-reasoner");
        assert!(first["choices"][0].get("finish_reason").is_some());
    }

    #[test]
    fn test_unflushed_reasoning_at_eof() {
        let out = run(vec![delta_chunk(json!({"reasoning": "only thoughts"}), None)]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].parse_json().unwrap()["choices"][0]["delta"]["thinking"]["content"], "only thoughts");
        let flush = out[1].parse_json().unwrap();
        assert_eq!(flush["choices"][0]["delta"]["content"], "only thoughts");
        assert_eq!(flush["id"], "chatcmpl-r");
        assert_eq!(flush["created"], 7);
        assert!(out[2].is_done());
    }

    #[test]
    fn test_plain_stream_is_untouched_except_done() {
        let out = run(vec![
            delta_chunk(json!({"role": "assistant", "content": "hi"}), None),
            SseEvent::data("not json"),
            delta_chunk(json!({}), Some("stop")),
            SseEvent::done(),
        ]);

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].parse_json().unwrap()["choices"][0]["delta"]["content"], "hi");
        assert_eq!(out[1], SseEvent::data("not json"));
        assert_eq!(out[2].parse_json().unwrap()["choices"][0]["index"], 0);
        assert!(out[3].is_done());
        assert_eq!(out.iter().filter(|e| e.is_done()).count(), 1);
    }

    #[test]
    fn test_buffered_reasoning_moves_to_thinking() {
        let mut response = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4", "reasoning_content": "2+2", "reasoning": null}
            }]
        });
        reasoning_to_thinking(&mut response);
        assert_eq!(
            response["choices"][0]["message"],
            json!({"role": "assistant", "content": "4", "thinking": {"content": "2+2"}})
        );
    }
}
