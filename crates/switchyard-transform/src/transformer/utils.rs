/// Transformer utilities
use serde_json::{Map, Value};

use crate::error::{Result, TransformError};

/// Strip a `provider,` routing prefix from a model name
pub fn strip_provider_prefix(model: &str) -> &str {
    match model.split_once(',') {
        Some((_, rest)) => rest,
        None => model,
    }
}

/// Recursively remove JSON-Schema keywords vendors reject
pub fn clean_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for value in map.values_mut() {
                clean_schema(value);
            }
        }
        Value::Array(items) => {
            for item in items {
                clean_schema(item);
            }
        }
        _ => {}
    }
}

/// JSON type name used in error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert message content to a simple string representation
pub fn content_to_string(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| match p {
                Value::String(text) => Some(text.as_str()),
                Value::Object(_) => p.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Borrow the top-level object of a request body
pub fn body_object<'a>(body: &'a mut Value, transformer: &str) -> Result<&'a mut Map<String, Value>> {
    let type_name = json_type_name(body);
    body.as_object_mut().ok_or_else(|| {
        TransformError::invalid_request(transformer, format!("expected a JSON object body, got {}", type_name))
    })
}

/// Take the required `messages` array out of a request body
pub fn take_messages(body: &mut Map<String, Value>, transformer: &str) -> Result<Vec<Value>> {
    match body.remove("messages") {
        Some(Value::Array(messages)) => Ok(messages),
        Some(other) => Err(TransformError::invalid_request(
            transformer,
            format!("messages must be an array, got {}", json_type_name(&other)),
        )),
        None => Err(TransformError::missing_field(transformer, "messages")),
    }
}

/// Parse tool call arguments, falling back to an empty object
pub fn parse_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Map::new()))
        }
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        _ => Value::Object(Map::new()),
    }
}
