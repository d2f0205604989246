use async_trait::async_trait;
use serde_json::{json, Value};

use super::reasoning::{reasoning_to_thinking, ReasoningStream};
use super::utils::{body_object, strip_provider_prefix};
use super::Transformer;
use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};
use crate::stream::rewrite_event_stream;

pub const NAME: &str = "openrouter";

/// OpenRouter: routing-prefix removal and reasoning normalization
#[derive(Debug, Default)]
pub struct OpenRouterTransformer;

impl OpenRouterTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for OpenRouterTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            let obj = body_object(&mut body, NAME)?;
            if let Some(model) = obj.get("model").and_then(Value::as_str) {
                let stripped = strip_provider_prefix(model).to_string();
                obj.insert("model".to_string(), json!(stripped));
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
