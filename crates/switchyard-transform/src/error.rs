use thiserror::Error;

/// Errors raised while transforming requests and responses
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{transformer}: missing required field '{field}'")]
    MissingField { transformer: String, field: String },

    #[error("{transformer}: invalid request: {message}")]
    InvalidRequest { transformer: String, message: String },

    #[error("{provider}: {parameter} must be between {min} and {max}, got {value}")]
    ParameterOutOfRange {
        provider: String,
        parameter: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{provider}: invalid {parameter} type: {found}")]
    InvalidParameterType {
        provider: String,
        parameter: String,
        found: &'static str,
    },

    #[error("transformer not found: {0}")]
    TransformerNotFound(String),

    #[error("transformer already registered: {0}")]
    DuplicateTransformer(String),

    #[error("invalid tool definition '{tool}': {reason}")]
    InvalidToolDefinition { tool: String, reason: String },

    #[error("invalid transformer configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransformError {
    pub fn missing_field(transformer: &str, field: &str) -> Self {
        Self::MissingField {
            transformer: transformer.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_request(transformer: &str, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            transformer: transformer.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = TransformError::missing_field("gemini", "messages");
        assert_eq!(err.to_string(), "gemini: missing required field 'messages'");

        let err = TransformError::ParameterOutOfRange {
            provider: "anthropic".into(),
            parameter: "temperature".into(),
            min: 0.0,
            max: 1.0,
            value: 2.5,
        };
        assert_eq!(
            err.to_string(),
            "anthropic: temperature must be between 0 and 1, got 2.5"
        );
    }
}
