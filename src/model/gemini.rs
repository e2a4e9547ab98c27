use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        GenerationRequest, GenerationResult, TextGenerator, TokenSource, TokenUsage,
        estimate_tokens,
    },
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: RequestGenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    status: Option<String>,
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::with_base_url(config.api_key.clone(), config.api_base.clone())
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::Configuration("Gemini API key is empty".into()));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    fn transport_error(err: &reqwest::Error) -> ServiceError {
        warn!(error = %err, "Gemini request failed in transport");
        let message = if err.is_timeout() {
            "request to Gemini API timed out"
        } else if err.is_connect() {
            "could not connect to Gemini API"
        } else {
            "request to Gemini API failed"
        };
        ServiceError::upstream(None, message)
    }

    fn api_error(status: StatusCode, body: &str) -> ServiceError {
        let detail = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
        let exhausted = detail
            .as_ref()
            .and_then(|d| d.status.as_deref())
            .is_some_and(|s| s == "RESOURCE_EXHAUSTED");
        let message = detail.map_or_else(
            || {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string()
            },
            |d| d.message,
        );

        if status == StatusCode::TOO_MANY_REQUESTS || exhausted {
            ServiceError::RateLimited(message)
        } else {
            ServiceError::upstream(Some(status.as_u16()), message)
        }
    }

    fn extract_text(response: &GeminiResponse) -> Result<String, ServiceError> {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ServiceError::upstream(
                Some(200),
                format!("prompt was blocked by Gemini ({reason})"),
            ));
        }

        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| ServiceError::upstream(Some(200), "Gemini returned no candidates"))?;

        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.is_empty() {
            let reason = candidate.finish_reason.as_deref().unwrap_or("unknown");
            return Err(ServiceError::upstream(
                Some(200),
                format!("Gemini returned no text (finish reason: {reason})"),
            ));
        }
        Ok(text)
    }

    /// Provider counts where reported, whitespace estimate otherwise.
    fn usage(response: &GeminiResponse, prompt: &str, text: &str) -> (TokenUsage, TokenSource) {
        let reported = response.usage_metadata.as_ref();
        let prompt_count = reported.and_then(|u| u.prompt_token_count);
        let completion_count = reported.and_then(|u| u.candidates_token_count);

        let source = if prompt_count.is_some() && completion_count.is_some() {
            TokenSource::Provider
        } else {
            TokenSource::Estimated
        };
        let usage = TokenUsage::new(
            prompt_count.unwrap_or_else(|| estimate_tokens(prompt)),
            completion_count.unwrap_or_else(|| estimate_tokens(text)),
        );
        (usage, source)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ServiceError> {
        let payload = GeminiRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: RequestGenerationConfig {
                temperature: request.config.temperature,
                max_output_tokens: request.config.max_output_tokens,
            },
        };

        debug!("sending generateContent request");

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::transport_error(&e))?;

        if !status.is_success() {
            warn!(status = %status, "Gemini API returned an error");
            return Err(Self::api_error(status, &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "failed to parse Gemini response");
            ServiceError::upstream(Some(status.as_u16()), "malformed response from Gemini API")
        })?;

        let text = Self::extract_text(&parsed)?;
        let (usage, token_source) = Self::usage(&parsed, &request.prompt, &text);

        Ok(GenerationResult {
            text,
            usage,
            token_source,
        })
    }
}
