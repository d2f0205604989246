use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use switchyard_config::{Config, ParameterTable, Range};
use tracing::debug;

use super::utils::{body_object, json_type_name};
use super::Transformer;
use crate::error::{Result, TransformError};
use crate::payload::RequestPayload;

pub const NAME: &str = "parameters";

/// Sampling parameters checked on every request
pub const COMMON_PARAMETERS: [&str; 6] = [
    "temperature",
    "top_p",
    "top_k",
    "presence_penalty",
    "frequency_penalty",
    "max_tokens",
];

/// Parameters Gemini expects inside `generationConfig`
const GEMINI_NESTED: [&str; 6] = [
    "temperature",
    "topP",
    "topK",
    "maxOutputTokens",
    "presencePenalty",
    "frequencyPenalty",
];

/// Validates and renames sampling parameters per provider.
///
/// Tables start from configuration and can be changed at runtime.
pub struct ParametersTransformer {
    tables: RwLock<HashMap<String, ParameterTable>>,
}

impl ParametersTransformer {
    pub fn new(tables: HashMap<String, ParameterTable>) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.parameters.clone())
    }

    /// Rename `from` to `to` when sending to `provider`
    pub fn set_parameter_mapping(&self, provider: &str, from: &str, to: &str) {
        self.tables
            .write()
            .entry(provider.to_lowercase())
            .or_default()
            .renames
            .insert(from.to_string(), to.to_string());
    }

    /// Bound `parameter` (its provider-side name) for `provider`
    pub fn set_parameter_limit(&self, provider: &str, parameter: &str, range: Range) {
        self.tables
            .write()
            .entry(provider.to_lowercase())
            .or_default()
            .ranges
            .insert(parameter.to_string(), range);
    }

    pub fn table(&self, provider: &str) -> Option<ParameterTable> {
        self.tables.read().get(&provider.to_lowercase()).cloned()
    }

    fn apply(&self, body: &mut Map<String, Value>, provider: &str) -> Result<()> {
        let provider = provider.to_lowercase();
        let table = self.table(&provider).unwrap_or_default();

        for param in COMMON_PARAMETERS {
            let Some(value) = body.remove(param) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let target = table.renames.get(param).map(String::as_str).unwrap_or(param);
            let number = check_number(&provider, target, &value)?;
            if param != "max_tokens" {
                check_range(&provider, target, number, table.ranges.get(target))?;
            }
            if target != param {
                debug!(provider = %provider, from = param, to = target, "renamed parameter");
            }
            body.insert(target.to_string(), value);
        }

        match provider.as_str() {
            "openai" => {
                if let Some(logprobs) = body.get("logprobs").cloned() {
                    body.insert("logprobs".into(), json!(coerce_bool(&logprobs)));
                }
            }
            "anthropic" => {
                body.remove("presence_penalty");
                body.remove("frequency_penalty");
            }
            "gemini" => relocate_generation_config(body, &provider, &table)?,
            _ => {}
        }

        Ok(())
    }
}

fn check_number(provider: &str, parameter: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| TransformError::InvalidParameterType {
        provider: provider.to_string(),
        parameter: parameter.to_string(),
        found: json_type_name(value),
    })
}

fn check_range(provider: &str, parameter: &str, value: f64, range: Option<&Range>) -> Result<()> {
    match range {
        Some(range) if !range.contains(value) => Err(TransformError::ParameterOutOfRange {
            provider: provider.to_string(),
            parameter: parameter.to_string(),
            min: range.min,
            max: range.max,
            value,
        }),
        _ => Ok(()),
    }
}

fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Move top-level sampling fields into `generationConfig` and validate
/// whatever ends up there.
fn relocate_generation_config(
    body: &mut Map<String, Value>,
    provider: &str,
    table: &ParameterTable,
) -> Result<()> {
    let mut moved = Map::new();
    for key in GEMINI_NESTED {
        if let Some(value) = body.remove(key) {
            moved.insert(key.to_string(), value);
        }
    }

    let config = body
        .entry("generationConfig")
        .or_insert_with(|| Value::Object(Map::new()));
    if !config.is_object() {
        return Err(TransformError::InvalidParameterType {
            provider: provider.to_string(),
            parameter: "generationConfig".to_string(),
            found: json_type_name(config),
        });
    }
    let Some(config) = config.as_object_mut() else {
        return Ok(());
    };
    config.extend(moved);

    for key in GEMINI_NESTED {
        let Some(value) = config.get(key) else {
            continue;
        };
        let number = check_number(provider, key, value)?;
        check_range(provider, key, number, table.ranges.get(key))?;
    }

    if config.is_empty() {
        body.remove("generationConfig");
    }
    Ok(())
}

#[async_trait]
impl Transformer for ParametersTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn transform_request_in(&self, request: RequestPayload, provider: &str) -> Result<RequestPayload> {
        request.map_body(|mut body| {
            self.apply(body_object(&mut body, NAME)?, provider)?;
            Ok(body)
        })
    }
}
