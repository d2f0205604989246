use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::provider::ProviderConfig;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub engine: EngineConfig,
    pub providers: Vec<ProviderConfig>,
    pub token_budget: TokenBudgetConfig,
    /// provider 名称 -> 参数表
    pub parameters: HashMap<String, ParameterTable>,
    /// vendor 名称 -> (vendor finish reason -> canonical finish reason)
    pub finish_reasons: HashMap<String, HashMap<String, String>>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine: EngineConfig::default(),
            providers: Vec::new(),
            token_budget: TokenBudgetConfig::default(),
            parameters: default_parameter_tables(),
            finish_reasons: default_finish_reasons(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 按名称查找 provider
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["engine", "chain_cache_capacity"] => Some(self.engine.chain_cache_capacity.to_string()),
            ["token_budget", "default_max_tokens"] => Some(self.token_budget.default_max_tokens.to_string()),
            ["token_budget", "safety_buffer"] => Some(self.token_budget.safety_buffer.to_string()),
            ["token_budget", "min_output_tokens"] => Some(self.token_budget.min_output_tokens.to_string()),
            ["token_budget", "deepseek_max_output"] => Some(self.token_budget.deepseek_max_output.to_string()),
            ["token_budget", "provider_limits", provider] => self
                .token_budget
                .provider_limits
                .get(*provider)
                .map(|limit| limit.to_string()),
            ["logging", "level"] => Some(self.logging.level.as_str().to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["engine", "chain_cache_capacity"] => {
                self.engine.chain_cache_capacity = parse_number(value)?;
            }
            ["token_budget", "default_max_tokens"] => {
                self.token_budget.default_max_tokens = parse_number(value)?;
            }
            ["token_budget", "safety_buffer"] => {
                self.token_budget.safety_buffer = parse_number(value)?;
            }
            ["token_budget", "min_output_tokens"] => {
                self.token_budget.min_output_tokens = parse_number(value)?;
            }
            ["token_budget", "deepseek_max_output"] => {
                self.token_budget.deepseek_max_output = parse_number(value)?;
            }
            ["token_budget", "provider_limits", provider] => {
                let limit = parse_number(value)?;
                self.token_budget
                    .provider_limits
                    .insert(provider.to_string(), limit);
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = value.parse().map_err(|_| {
                    ConfigError::Validation(format!("Invalid boolean: {}", value))
                })?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// provider 链缓存容量
    pub chain_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_cache_capacity: 100,
        }
    }
}

/// Token 预算配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TokenBudgetConfig {
    pub default_max_tokens: u64,
    pub safety_buffer: u64,
    pub min_output_tokens: u64,
    /// DeepSeek 单次输出上限
    pub deepseek_max_output: u64,
    /// provider 名称 -> 上下文窗口大小
    pub provider_limits: HashMap<String, u64>,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        let provider_limits = [
            ("anthropic", 200_000),
            ("openai", 128_000),
            ("groq", 32_768),
            ("gemini", 1_048_576),
            ("deepseek", 32_768),
            ("openrouter", 200_000),
            ("mistral", 32_768),
            ("xai", 128_000),
        ]
        .into_iter()
        .map(|(name, limit)| (name.to_string(), limit))
        .collect();

        Self {
            default_max_tokens: 4096,
            safety_buffer: 100,
            min_output_tokens: 10,
            deepseek_max_output: 8192,
            provider_limits,
        }
    }
}

/// 参数取值区间
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// 单个 provider 的参数映射与取值范围
///
/// `ranges` 以映射后的参数名为键。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ParameterTable {
    pub renames: HashMap<String, String>,
    pub ranges: HashMap<String, Range>,
}

impl ParameterTable {
    fn with_ranges(ranges: &[(&str, f64, f64)]) -> Self {
        Self {
            renames: HashMap::new(),
            ranges: ranges
                .iter()
                .map(|(name, min, max)| (name.to_string(), Range::new(*min, *max)))
                .collect(),
        }
    }
}

fn default_parameter_tables() -> HashMap<String, ParameterTable> {
    let mut tables = HashMap::new();

    tables.insert(
        "anthropic".to_string(),
        ParameterTable::with_ranges(&[
            ("temperature", 0.0, 1.0),
            ("top_p", 0.0, 1.0),
            ("top_k", 1.0, 100_000.0),
        ]),
    );
    tables.insert(
        "openai".to_string(),
        ParameterTable::with_ranges(&[
            ("temperature", 0.0, 2.0),
            ("top_p", 0.0, 1.0),
            ("presence_penalty", -2.0, 2.0),
            ("frequency_penalty", -2.0, 2.0),
        ]),
    );

    let mut gemini = ParameterTable::with_ranges(&[
        ("temperature", 0.0, 2.0),
        ("topP", 0.0, 1.0),
        ("topK", 1.0, 100.0),
        ("presencePenalty", -2.0, 2.0),
        ("frequencyPenalty", -2.0, 2.0),
    ]);
    gemini.renames = [
        ("max_tokens", "maxOutputTokens"),
        ("top_p", "topP"),
        ("top_k", "topK"),
        ("presence_penalty", "presencePenalty"),
        ("frequency_penalty", "frequencyPenalty"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect();
    tables.insert("gemini".to_string(), gemini);

    for provider in ["deepseek", "groq"] {
        tables.insert(
            provider.to_string(),
            ParameterTable::with_ranges(&[("temperature", 0.0, 2.0), ("top_p", 0.0, 1.0)]),
        );
    }

    tables
}

fn default_finish_reasons() -> HashMap<String, HashMap<String, String>> {
    fn table(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect()
    }

    HashMap::from([
        (
            "anthropic".to_string(),
            table(&[
                ("end_turn", "stop"),
                ("stop_sequence", "stop"),
                ("max_tokens", "length"),
                ("tool_use", "tool_calls"),
                ("refusal", "content_filter"),
            ]),
        ),
        (
            "gemini".to_string(),
            table(&[
                ("STOP", "stop"),
                ("MAX_TOKENS", "length"),
                ("SAFETY", "content_filter"),
                ("RECITATION", "content_filter"),
                ("PROHIBITED_CONTENT", "content_filter"),
                ("BLOCKLIST", "content_filter"),
            ]),
        ),
        (
            "mistral".to_string(),
            table(&[
                ("stop", "stop"),
                ("length", "length"),
                ("model_length", "length"),
                ("tool_calls", "tool_calls"),
            ]),
        ),
    ])
}

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// 是否使用 JSON 格式输出
    pub json_format: bool,
    /// 日志文件路径，设置后同时输出到文件
    pub file: Option<String>,
    /// 模块级别的日志配置
    pub module_levels: HashMap<String, String>,
    pub ansi_colors: bool,
    pub include_target: bool,
    pub include_thread_id: bool,
    pub include_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            file: None,
            module_levels: HashMap::new(),
            ansi_colors: true,
            include_target: true,
            include_thread_id: false,
            include_line_number: true,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Watch error: {0}")]
    #[cfg(feature = "hot-reload")]
    Watch(#[from] notify::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
