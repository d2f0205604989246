use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation found in a message or stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Outcome of running a tool, sent back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: Value,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            error: None,
        }
    }

    pub fn failure(tool_use_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Tool definition layout expected by a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolFormat {
    /// `{name, description, input_schema}`
    Anthropic,
    /// `{type: "function", function: {name, description, parameters}}`
    OpenAi,
    /// `{name, description, parameters: <schema properties>}`
    Gemini,
}

impl ToolFormat {
    /// Resolve the layout for a provider name. Unknown providers get `None`.
    pub fn for_provider(provider: &str) -> Option<Self> {
        match provider.to_lowercase().as_str() {
            "anthropic" => Some(ToolFormat::Anthropic),
            "openai" | "gpt" => Some(ToolFormat::OpenAi),
            "google" | "gemini" => Some(ToolFormat::Gemini),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_for_provider() {
        assert_eq!(ToolFormat::for_provider("Anthropic"), Some(ToolFormat::Anthropic));
        assert_eq!(ToolFormat::for_provider("gpt"), Some(ToolFormat::OpenAi));
        assert_eq!(ToolFormat::for_provider("google"), Some(ToolFormat::Gemini));
        assert_eq!(ToolFormat::for_provider("mistral"), None);
    }
}
