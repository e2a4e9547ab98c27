use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{config::AppConfig, error::ServiceError};

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const MAX_OUTPUT_TOKENS_LIMIT: i64 = 8192;

/// Inbound body of `POST /gemini/generate`.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct GenerateBody {
    pub prompt: Option<PromptBody>,
    pub generation_config: Option<GenerationConfigBody>,
    /// One of the configured models; the default model when omitted.
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PromptBody {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfigBody {
    /// Sampling temperature in `[0.0, 2.0]`.
    pub temperature: Option<f64>,
    /// Upper bound on generated tokens in `[1, 8192]`.
    pub max_output_tokens: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// A validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub config: GenerationConfig,
}

impl GenerateBody {
    /// Validates the body and fills omitted parameters from `config`.
    ///
    /// Out-of-range parameters are rejected rather than clamped.
    pub fn validate(self, config: &AppConfig) -> Result<GenerationRequest, ServiceError> {
        let prompt = self
            .prompt
            .and_then(|p| p.text)
            .ok_or_else(|| ServiceError::Validation("missing required field: prompt.text".into()))?;
        if prompt.trim().is_empty() {
            return Err(ServiceError::Validation(
                "prompt.text must not be empty".into(),
            ));
        }

        let model = match self.model {
            Some(model) if config.allows_model(&model) => model,
            Some(model) => {
                return Err(ServiceError::Validation(format!(
                    "model '{model}' is not enabled; available models: {}",
                    config.models.join(", ")
                )));
            }
            None => config.model_name.clone(),
        };

        let overrides = self.generation_config.unwrap_or_default();

        let temperature = overrides.temperature.unwrap_or(config.temperature);
        if !temperature.is_finite() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(ServiceError::Validation(format!(
                "generation_config.temperature must be between {MIN_TEMPERATURE} and {MAX_TEMPERATURE}"
            )));
        }

        let max_output_tokens = match overrides.max_output_tokens {
            Some(value) if (1..=MAX_OUTPUT_TOKENS_LIMIT).contains(&value) => value as u32,
            Some(_) => {
                return Err(ServiceError::Validation(format!(
                    "generation_config.max_output_tokens must be between 1 and {MAX_OUTPUT_TOKENS_LIMIT}"
                )));
            }
            None => config.max_output_tokens,
        };

        Ok(GenerationRequest {
            prompt,
            model,
            config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Where the token counts of a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Provider,
    Estimated,
}

impl TokenSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenSource::Provider => "provider",
            TokenSource::Estimated => "estimated",
        }
    }
}

/// Normalized output of one upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    pub usage: TokenUsage,
    pub token_source: TokenSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
    pub metrics: TokenUsage,
    /// Identifier of the stored metrics row; absent when the write failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
}
