mod gemini;
mod tokens;
mod types;

use async_trait::async_trait;

use crate::error::ServiceError;

pub use gemini::GeminiClient;
pub use tokens::estimate_tokens;
pub use types::{
    GenerateBody, GenerateResponse, GenerationConfig, GenerationConfigBody, GenerationRequest,
    GenerationResult, PromptBody, TokenSource, TokenUsage,
};

/// A text-generation backend.
///
/// Implementations make exactly one upstream call per invocation and never
/// retry. Provider failures are reported as `ServiceError::Upstream` or
/// `ServiceError::RateLimited`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationResult, ServiceError>;
}
