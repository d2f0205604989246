use async_trait::async_trait;
use serde_json::{json, Value};
use switchyard_config::Config;
use tracing::debug;

use super::utils::body_object;
use super::Transformer;
use crate::canonical::FinishReasonTable;
use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, rewrite_event_stream, StreamRewriter};

pub const NAME: &str = "mistral";

/// Canonical request fields the Mistral API rejects
const UNSUPPORTED_FIELDS: [&str; 7] = [
    "logit_bias",
    "logprobs",
    "top_logprobs",
    "user",
    "store",
    "service_tier",
    "stream_options",
];

/// Mistral chat completions
pub struct MistralTransformer {
    finish_reasons: FinishReasonTable,
}

impl MistralTransformer {
    pub fn new(finish_reasons: FinishReasonTable) -> Self {
        Self { finish_reasons }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(FinishReasonTable::from_config(NAME, config))
    }
}

fn map_finish_reasons(table: &FinishReasonTable, value: &mut Value) {
    let Some(choices) = value.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let raw = match choice.get("finish_reason").and_then(Value::as_str) {
            Some(raw) => raw.to_string(),
            None => continue,
        };
        let mapped = table.map(Some(&raw));
        if mapped.as_str() != raw {
            debug!(raw = %raw, mapped = %mapped, "mapped mistral finish reason");
        }
        choice["finish_reason"] = json!(mapped.as_str());
    }
}

/// Maps finish reasons chunk by chunk and owns the terminator.
struct MistralStream {
    finish_reasons: FinishReasonTable,
}

impl StreamRewriter for MistralStream {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if event.is_done() {
            return Vec::new();
        }
        match parse_event_json(&event, NAME) {
            Some(mut chunk) => {
                map_finish_reasons(&self.finish_reasons, &mut chunk);
                vec![SseEvent {
                    data: chunk.to_string(),
                    ..event
                }]
            }
            None => vec![event],
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        vec![SseEvent::done()]
    }
}

#[async_trait]
impl Transformer for MistralTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            let obj = body_object(&mut body, NAME)?;

            if obj.get("tool_choice").and_then(Value::as_str) == Some("required") {
                obj.insert("tool_choice".to_string(), json!("any"));
            }
            if let Some(seed) = obj.remove("seed") {
                obj.insert("random_seed".to_string(), seed);
            }
            for field in UNSUPPORTED_FIELDS {
                if obj.remove(field).is_some() {
                    debug!(field, "dropped field unsupported by mistral");
                }
            }
            Ok(body)
        })
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if response.status.is_success() && response.is_event_stream() {
            let rewriter = MistralStream {
                finish_reasons: self.finish_reasons.clone(),
            };
            return Ok(rewrite_event_stream(response, NAME, rewriter));
        }

        let table = &self.finish_reasons;
        response
            .map_json(NAME, |mut value| {
                map_finish_reasons(table, &mut value);
                value
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn transformer() -> MistralTransformer {
        MistralTransformer::from_config(&Config::default())
    }

    #[test]
    fn test_request_rewrites() {
        let body = json!({
            "model": "mistral-large-latest",
            "messages": [{"role": "user", "content": "hi"}],
            "tool_choice": "required",
            "seed": 42,
            "logit_bias": {"50256": -100},
            "user": "u-1"
        });
        let out = transformer().transform_request_in(RequestPayload::Body(body), NAME).unwrap();
        let out = out.body();

        assert_eq!(out["tool_choice"], "any");
        assert_eq!(out["random_seed"], 42);
        assert!(out.get("seed").is_none());
        assert!(out.get("logit_bias").is_none());
        assert!(out.get("user").is_none());
        assert_eq!(out["messages"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn test_model_length_in_both_modes() {
        let buffered = ProviderResponse::json(
            StatusCode::OK,
            &json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "x"}, "finish_reason": "model_length"}]}),
        )
        .unwrap();
        let out = transformer().transform_response_out(buffered).await.unwrap();
        let body: Value = serde_json::from_str(&out.text().await.unwrap()).unwrap();
        assert_eq!(body["choices"][0]["finish_reason"], "length");

        let stream = ProviderResponse::event_stream(
            &b"data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"model_length\"}]}\n\ndata: [DONE]\n\n"[..],
        );
        let out = transformer().transform_response_out(stream).await.unwrap();
        assert_eq!(
            out.text().await.unwrap(),
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\",\"index\":0}]}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_stream_terminated_once_without_upstream_done() {
        let stream = ProviderResponse::event_stream(
            &b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n"[..],
        );
        let text = transformer().transform_response_out(stream).await.unwrap().text().await.unwrap();
        assert!(text.ends_with("\n\ndata: [DONE]\n\n"));
        assert_eq!(text.matches("[DONE]").count(), 1);

        let mut stream = MistralStream {
            finish_reasons: FinishReasonTable::from_config(NAME, &Config::default()),
        };
        assert!(stream.rewrite(SseEvent::done()).is_empty());
        assert_eq!(stream.finish(), vec![SseEvent::done()]);
    }
}
