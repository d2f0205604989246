pub mod anthropic;
pub mod deepseek;
pub mod gemini;
pub mod maxtoken;
pub mod mistral;
pub mod openai;
pub mod openrouter;
pub mod parameters;
pub mod reasoning;
pub mod tool;
pub mod tooluse;
pub mod utils;

pub use anthropic::AnthropicTransformer;
pub use deepseek::DeepSeekTransformer;
pub use gemini::GeminiTransformer;
pub use maxtoken::MaxTokenTransformer;
pub use mistral::MistralTransformer;
pub use openai::OpenAiTransformer;
pub use openrouter::OpenRouterTransformer;
pub use parameters::ParametersTransformer;
pub use tool::ToolTransformer;
pub use tooluse::ToolUseTransformer;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::payload::{ProviderResponse, RequestPayload};

/// A named, bidirectional wire-format transformation.
///
/// Every operation defaults to passthrough, so an implementation only
/// overrides the directions it actually rewrites.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Unique registry name
    fn name(&self) -> &str;

    /// Endpoint path this transformer serves, if any
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Canonical request -> vendor request
    fn transform_request_in(&self, request: RequestPayload, _provider: &str) -> Result<RequestPayload> {
        Ok(request)
    }

    /// Vendor request -> canonical request
    fn transform_request_out(&self, request: RequestPayload) -> Result<RequestPayload> {
        Ok(request)
    }

    async fn transform_response_in(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        Ok(response)
    }

    /// Vendor response -> canonical response, buffered or streaming
    async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        Ok(response)
    }

    /// Build a variant of this transformer with per-provider options.
    ///
    /// `Ok(None)` means the transformer takes no options and the shared
    /// instance is used as is.
    fn with_options(&self, _options: &Map<String, Value>) -> Result<Option<Arc<dyn Transformer>>> {
        Ok(None)
    }
}

/// Ordered transformer pipeline.
///
/// Requests fold front to back; responses fold back to front, so the last
/// stage to rewrite an outbound request is the first to see the raw response.
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn Transformer>>,
}

impl TransformerChain {
    pub fn new(transformers: Vec<Arc<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    pub fn push(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn transform_request_in(&self, request: RequestPayload, provider: &str) -> Result<RequestPayload> {
        self.transformers
            .iter()
            .try_fold(request, |acc, t| t.transform_request_in(acc, provider))
    }

    pub fn transform_request_out(&self, request: RequestPayload) -> Result<RequestPayload> {
        self.transformers
            .iter()
            .rev()
            .try_fold(request, |acc, t| t.transform_request_out(acc))
    }

    pub async fn transform_response_in(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        let mut response = response;
        for t in &self.transformers {
            response = t.transform_response_in(response).await?;
        }
        Ok(response)
    }

    pub async fn transform_response_out(&self, response: ProviderResponse) -> Result<ProviderResponse> {
        let mut response = response;
        for t in self.transformers.iter().rev() {
            response = t.transform_response_out(response).await?;
        }
        Ok(response)
    }
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain")
            .field("transformers", &self.names())
            .finish()
    }
}
