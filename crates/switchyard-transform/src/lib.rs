//! Bidirectional LLM wire-format transformation.
//!
//! A [`TransformerService`] owns named [`Transformer`]s and assembles cached
//! per-provider [`TransformerChain`]s. Requests move canonical to vendor
//! shape front to back; responses, buffered or streamed as SSE, move vendor
//! to canonical shape back to front.

pub mod canonical;
pub mod error;
pub mod payload;
pub mod registry;
pub mod service;
pub mod sse;
pub mod stream;
pub mod tokens;
pub mod tools;
pub mod transformer;

// Re-export core types
pub use error::{Result, TransformError};
pub use payload::{ProviderResponse, RequestConfig, RequestPayload, ResponseBody, ResponseHead};
pub use registry::{builtin_transformers, register_builtin_transformers};
pub use service::TransformerService;
pub use sse::{SseEvent, SseReader, SseWriter};
pub use stream::{rewrite_event_stream, StreamRewriter};
pub use transformer::{Transformer, TransformerChain};
