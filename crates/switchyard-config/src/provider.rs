use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::config::{ConfigError, ConfigResult};

/// 单个 provider 的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    /// 有序的 transformer 列表，为空时使用默认链
    #[serde(default, deserialize_with = "deserialize_transformer_specs")]
    pub transformers: Vec<TransformerSpec>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base_url: None,
            models: Vec::new(),
            transformers: Vec::new(),
        }
    }

    pub fn with_transformer(mut self, spec: TransformerSpec) -> Self {
        self.transformers.push(spec);
        self
    }
}

/// transformer 名称及其选项
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransformerSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl TransformerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// 解析 transformer 配置
///
/// 支持以下写法：
/// - `"anthropic"`
/// - `["anthropic", ["maxtoken", {"max_tokens": 8192}]]`
/// - `[{"name": "maxtoken", "options": {...}}]`
/// - `{"use": [...]}`
pub fn parse_transformer_specs(value: &Value) -> ConfigResult<Vec<TransformerSpec>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(name) => Ok(vec![TransformerSpec::new(name.as_str())]),
        Value::Array(items) => items.iter().map(parse_entry).collect(),
        Value::Object(obj) => match obj.get("use") {
            Some(inner) => parse_transformer_specs(inner),
            None => Err(ConfigError::Validation(
                "transformer object must contain a \"use\" list".to_string(),
            )),
        },
        other => Err(ConfigError::Validation(format!(
            "invalid transformer configuration: {}",
            other
        ))),
    }
}

fn parse_entry(entry: &Value) -> ConfigResult<TransformerSpec> {
    match entry {
        Value::String(name) => Ok(TransformerSpec::new(name.as_str())),
        Value::Array(pair) => {
            let name = pair
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "transformer entry must start with a name: {}",
                        entry
                    ))
                })?;
            let options = match pair.get(1) {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(opts)) => opts.clone(),
                Some(other) => {
                    return Err(ConfigError::Validation(format!(
                        "options for transformer '{}' must be an object, got {}",
                        name, other
                    )))
                }
            };
            Ok(TransformerSpec {
                name: name.to_string(),
                options,
            })
        }
        Value::Object(_) => Ok(serde_json::from_value(entry.clone())?),
        other => Err(ConfigError::Validation(format!(
            "invalid transformer entry: {}",
            other
        ))),
    }
}

fn deserialize_transformer_specs<'de, D>(deserializer: D) -> Result<Vec<TransformerSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    parse_transformer_specs(&raw).map_err(D::Error::custom)
}
