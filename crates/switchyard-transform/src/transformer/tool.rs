use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::utils::{body_object, strip_provider_prefix};
use super::Transformer;
use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};
use crate::sse::SseEvent;
use crate::stream::{parse_event_json, rewrite_event_stream, StreamRewriter};
use crate::tools::{
    extract_tool_uses, normalize_tool, transform_tools_for_provider, unmatched_tool_results,
    validate_tool_definition, ToolCallAccumulator, ToolFormat,
};

pub const NAME: &str = "tool";

/// OpenAI models that only understand the `functions` field
pub const LEGACY_FUNCTION_MODELS: [&str; 4] = [
    "gpt-3.5-turbo-0613",
    "gpt-3.5-turbo-16k-0613",
    "gpt-4-0613",
    "gpt-4-32k-0613",
];

/// Validates tool definitions and reshapes them for the target provider.
#[derive(Debug, Default)]
pub struct ToolTransformer;

impl ToolTransformer {
    pub fn new() -> Self {
        Self
    }
}

fn is_legacy_function_model(model: &str) -> bool {
    LEGACY_FUNCTION_MODELS.contains(&strip_provider_prefix(model))
}

fn reshape_tools(body: &mut serde_json::Map<String, Value>, provider: &str) -> Result<()> {
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        let unmatched = unmatched_tool_results(messages);
        if !unmatched.is_empty() {
            warn!(provider, ids = ?unmatched, "tool results without a matching tool call");
        }
    }

    // Gemini bodies carry functionDeclarations already
    if body.contains_key("contents") {
        return Ok(());
    }
    let Some(Value::Array(tools)) = body.get("tools") else {
        return Ok(());
    };

    let canonical: Vec<Value> = tools.iter().map(normalize_tool).collect();
    for tool in &canonical {
        validate_tool_definition(tool)?;
    }

    let Some(format) = ToolFormat::for_provider(provider) else {
        debug!(provider, count = canonical.len(), "validated tools, leaving layout as sent");
        return Ok(());
    };
    let reshaped = transform_tools_for_provider(&canonical, provider);

    let legacy = format == ToolFormat::OpenAi
        && body
            .get("model")
            .and_then(Value::as_str)
            .is_some_and(is_legacy_function_model);
    if legacy {
        let functions: Vec<Value> = reshaped
            .into_iter()
            .filter_map(|tool| tool.get("function").cloned())
            .collect();
        debug!(provider, count = functions.len(), "sending tools as legacy functions");
        body.remove("tools");
        body.insert("functions".into(), Value::Array(functions));
    } else {
        body.insert("tools".into(), Value::Array(reshaped));
    }
    Ok(())
}

/// Logs tool calls completed in a streamed response. Events pass unchanged.
#[derive(Default)]
struct ToolCallLog {
    calls: ToolCallAccumulator,
}

impl StreamRewriter for ToolCallLog {
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if !event.is_done() {
            if let Some(chunk) = parse_event_json(&event, NAME) {
                self.calls.push_chunk(&chunk);
            }
        }
        vec![event]
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        if !self.calls.is_empty() {
            for call in std::mem::take(&mut self.calls).finish() {
                debug!(id = %call.id, name = %call.name, input = %call.input, "streamed tool call");
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl Transformer for ToolTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            reshape_tools(body_object(&mut body, NAME)?, provider)?;
            Ok(body)
        })
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if !response.status.is_success() {
            return Ok(response);
        }
        if response.is_event_stream() {
            return Ok(rewrite_event_stream(response, NAME, ToolCallLog::default()));
        }
        response
            .map_json(NAME, |value| {
                let uses: Vec<_> = value
                    .get("choices")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|choice| choice.get("message"))
                    .flat_map(extract_tool_uses)
                    .collect();
                for tool_use in &uses {
                    debug!(id = %tool_use.id, name = %tool_use.name, "tool call in response");
                }
                value
            })
            .await
    }
}
