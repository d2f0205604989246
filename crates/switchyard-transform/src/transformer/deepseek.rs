use async_trait::async_trait;
use serde_json::{json, Value};
use switchyard_config::Config;
use tracing::debug;

use super::reasoning::{reasoning_to_thinking, ReasoningStream};
use super::utils::body_object;
use super::Transformer;
use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};
use crate::stream::rewrite_event_stream;

pub const NAME: &str = "deepseek";

/// DeepSeek chat completions: output cap and reasoning normalization
pub struct DeepSeekTransformer {
    max_output: u64,
}

impl DeepSeekTransformer {
    pub fn new(max_output: u64) -> Self {
        Self { max_output }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.token_budget.deepseek_max_output)
    }
}

#[async_trait]
impl Transformer for DeepSeekTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        let max_output = self.max_output;
        request.map_body(|mut body| {
            let obj = body_object(&mut body, NAME)?;
            let requested = obj.get("max_tokens").and_then(Value::as_u64);
            if let Some(requested) = requested.filter(|r| *r > max_output) {
                debug!(requested, max_output, "capping deepseek max_tokens");
                obj.insert("max_tokens".to_string(), json!(max_output));
            }
            Ok(body)
        })
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if response.status.is_success() && response.is_event_stream() {
            return Ok(rewrite_event_stream(response, NAME, ReasoningStream::new(NAME)));
        }
        response
            .map_json(NAME, |mut value| {
                reasoning_to_thinking(&mut value);
                value
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_caps_max_tokens() {
        let t = DeepSeekTransformer::from_config(&Config::default());
        let out = t
            .transform_request_in(RequestPayload::Body(json!({"model": "deepseek-chat", "messages": [], "max_tokens": 20000})), NAME)
            .unwrap();
        assert_eq!(out.body()["max_tokens"], 8192);

        let out = t
            .transform_request_in(RequestPayload::Body(json!({"messages": [], "max_tokens": 100})), NAME)
            .unwrap();
        assert_eq!(out.body()["max_tokens"], 100);
    }

    #[tokio::test]
    async fn test_streaming_reasoning_is_rewritten() {
        let upstream = concat!(
            "data: {\"id\":\"c1\",\"model\":\"deepseek-reasoner\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"reasoning_content\":\"hmm\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"c1\",\"model\":\"deepseek-reasoner\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        );
        let response = ProviderResponse::event_stream(upstream.as_bytes());
        let out = DeepSeekTransformer::new(8192).transform_response_out(response).await.unwrap();
        let text = out.text().await.unwrap();

        assert!(!text.contains("reasoning_content"));
        assert!(text.contains("\"thinking\":{\"content\":\"hmm\"}"));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("[DONE]").count(), 1);
    }

    #[tokio::test]
    async fn test_buffered_reasoning() {
        let response = ProviderResponse::json(
            StatusCode::OK,
            &json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": "4", "reasoning_content": "sum"}}]}),
        )
        .unwrap();
        let out = DeepSeekTransformer::new(8192).transform_response_out(response).await.unwrap();
        let body: Value = serde_json::from_str(&out.text().await.unwrap()).unwrap();
        assert_eq!(body["choices"][0]["message"]["thinking"]["content"], "sum");
    }
}
