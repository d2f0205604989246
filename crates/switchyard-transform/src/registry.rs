//! Built-in transformer set.

use std::sync::Arc;

use switchyard_config::Config;
use tracing::info;

use crate::error::Result;
use crate::service::TransformerService;
use crate::transformer::{
    AnthropicTransformer, DeepSeekTransformer, GeminiTransformer, MaxTokenTransformer,
    MistralTransformer, OpenAiTransformer, OpenRouterTransformer, ParametersTransformer,
    ToolTransformer, ToolUseTransformer, Transformer,
};

/// Instances of every built-in transformer, built from `config`
pub fn builtin_transformers(config: &Config) -> Vec<Arc<dyn Transformer>> {
    vec![
        Arc::new(AnthropicTransformer::from_config(config)),
        Arc::new(GeminiTransformer::from_config(config)),
        Arc::new(DeepSeekTransformer::from_config(config)),
        Arc::new(OpenRouterTransformer::new()),
        Arc::new(OpenAiTransformer::new()),
        Arc::new(MistralTransformer::from_config(config)),
        Arc::new(ParametersTransformer::from_config(config)),
        Arc::new(MaxTokenTransformer::from_config(config)),
        Arc::new(ToolUseTransformer::new()),
        Arc::new(ToolTransformer::new()),
    ]
}

pub fn register_builtin_transformers(service: &TransformerService, config: &Config) -> Result<()> {
    let transformers = builtin_transformers(config);
    let count = transformers.len();
    for transformer in transformers {
        service.register(transformer)?;
    }
    info!(count, "registered built-in transformers");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;

    #[test]
    fn test_builtin_names() {
        let service = TransformerService::with_builtins(&Config::default()).unwrap();
        assert_eq!(
            service.list(),
            vec![
                "anthropic", "deepseek", "gemini", "maxtoken", "mistral", "openai", "openrouter",
                "parameters", "tool", "tooluse"
            ]
        );
    }

    #[test]
    fn test_registering_twice_fails() {
        let config = Config::default();
        let service = TransformerService::with_builtins(&config).unwrap();
        let err = register_builtin_transformers(&service, &config).unwrap_err();
        assert!(matches!(err, TransformError::DuplicateTransformer(ref n) if n == "anthropic"));
    }
}
