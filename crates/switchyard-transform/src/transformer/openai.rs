use async_trait::async_trait;

use super::Transformer;

pub const NAME: &str = "openai";
pub const ENDPOINT: &str = "/v1/chat/completions";

/// OpenAI-compatible backends already speak the canonical shape.
#[derive(Debug, Default)]
pub struct OpenAiTransformer;

impl OpenAiTransformer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for OpenAiTransformer {
    fn name(&self) -> &str {
        NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(ENDPOINT)
    }
}
