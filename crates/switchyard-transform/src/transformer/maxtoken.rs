use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use switchyard_config::{Config, TokenBudgetConfig};
use tracing::{debug, warn};

use super::utils::{body_object, json_type_name};
use super::Transformer;
use crate::canonical::token_count;
use crate::error::{Result, TransformError};
use crate::payload::{ProviderResponse, RequestPayload};
use crate::stream::{rewrite_event_stream, ChunkMap};
use crate::tokens::estimate_prompt_tokens;

pub const NAME: &str = "maxtoken";

const USAGE_FIELDS: [&str; 3] = ["prompt_tokens", "completion_tokens", "total_tokens"];

/// Keeps the requested output budget inside the provider's context window.
pub struct MaxTokenTransformer {
    default_max_tokens: u64,
    safety_buffer: u64,
    min_output_tokens: u64,
    provider_limits: RwLock<HashMap<String, u64>>,
    limit_override: Option<u64>,
}

impl MaxTokenTransformer {
    pub fn new(budget: &TokenBudgetConfig) -> Self {
        Self {
            default_max_tokens: budget.default_max_tokens,
            safety_buffer: budget.safety_buffer,
            min_output_tokens: budget.min_output_tokens,
            provider_limits: RwLock::new(budget.provider_limits.clone()),
            limit_override: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.token_budget)
    }

    pub fn provider_limit(&self, provider: &str) -> u64 {
        self.limit_override
            .or_else(|| self.provider_limits.read().get(&provider.to_lowercase()).copied())
            .unwrap_or(self.default_max_tokens)
    }

    pub fn set_provider_limit(&self, provider: &str, limit: u64) {
        self.provider_limits
            .write()
            .insert(provider.to_lowercase(), limit);
    }

    fn budget(&self, body: &mut Map<String, Value>, provider: &str) -> Result<()> {
        let gemini = body.contains_key("contents");
        let field = if gemini { "maxOutputTokens" } else { "max_tokens" };
        let current = if gemini {
            body.get("generationConfig").and_then(|c| c.get(field))
        } else {
            body.get(field)
        };

        let requested = match current {
            None | Some(Value::Null) => self.default_max_tokens,
            Some(value) => {
                let number = value.as_f64().ok_or_else(|| TransformError::InvalidParameterType {
                    provider: provider.to_string(),
                    parameter: field.to_string(),
                    found: json_type_name(value),
                })?;
                if number <= 0.0 {
                    self.default_max_tokens
                } else {
                    number as u64
                }
            }
        };

        let limit = self.provider_limit(provider);
        let prompt = estimate_prompt_tokens(body);
        let available = limit.saturating_sub(prompt + self.safety_buffer);
        let granted = requested.min(limit).min(available).max(self.min_output_tokens);
        if granted != requested {
            debug!(provider, requested, granted, limit, prompt, "adjusted output token budget");
        }

        if gemini {
            let config = body
                .entry("generationConfig")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(config) = config.as_object_mut() {
                config.insert(field.to_string(), json!(granted));
            }
        } else {
            body.insert(field.to_string(), json!(granted));
        }
        Ok(())
    }
}

/// Fill in missing canonical usage counters, treating absent values as zero.
pub fn backfill_usage(value: &mut Value) {
    let Some(usage) = value.get_mut("usage").and_then(Value::as_object_mut) else {
        return;
    };
    // Vendor usage objects are left for the format transformer.
    if !USAGE_FIELDS.iter().any(|f| usage.contains_key(*f)) {
        return;
    }
    let prompt = token_count(usage.get("prompt_tokens"));
    let completion = token_count(usage.get("completion_tokens"));
    usage.entry("prompt_tokens").or_insert_with(|| json!(0));
    usage.entry("completion_tokens").or_insert_with(|| json!(0));
    usage
        .entry("total_tokens")
        .or_insert_with(|| json!(prompt + completion));
}

#[async_trait]
impl Transformer for MaxTokenTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            self.budget(body_object(&mut body, NAME)?, provider)?;
            Ok(body)
        })
    }

    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        if !response.status.is_success() {
            return Ok(response);
        }
        if response.is_event_stream() {
            return Ok(rewrite_event_stream(response, NAME, ChunkMap::new(NAME, backfill_usage)));
        }
        response
            .map_json(NAME, |mut value| {
                backfill_usage(&mut value);
                value
            })
            .await
    }

    /// `{"max_tokens": N}` replaces the provider limit for this instance.
    fn with_options(&self, options: &Map<String, Value>) -> Result<Option<Arc<dyn Transformer>>> {
        let Some(value) = options.get("max_tokens") else {
            if !options.is_empty() {
                warn!(options = ?options.keys().collect::<Vec<_>>(), "ignoring unknown maxtoken options");
            }
            return Ok(None);
        };
        let limit = value
            .as_u64()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| {
                TransformError::InvalidConfig(format!(
                    "{}: max_tokens option must be a positive integer, got {}",
                    NAME, value
                ))
            })?;

        Ok(Some(Arc::new(Self {
            default_max_tokens: self.default_max_tokens,
            safety_buffer: self.safety_buffer,
            min_output_tokens: self.min_output_tokens,
            provider_limits: RwLock::new(self.provider_limits.read().clone()),
            limit_override: Some(limit),
        })))
    }
}
