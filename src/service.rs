use std::{sync::Arc, time::Instant};

use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{GenerateBody, GenerateResponse, TextGenerator},
    store::{MetricsStore, NewMetricsRecord},
};

/// Where a generation request came from, stored alongside its metrics.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub endpoint: String,
    pub client_ip: Option<String>,
}

/// Request pipeline: validate, call upstream once, record metrics, respond.
pub struct GenerationService {
    config: Arc<AppConfig>,
    generator: Arc<dyn TextGenerator>,
    store: MetricsStore,
}

impl GenerationService {
    pub fn new(
        config: Arc<AppConfig>,
        generator: Arc<dyn TextGenerator>,
        store: MetricsStore,
    ) -> Self {
        Self {
            config,
            generator,
            store,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Runs one generation.
    ///
    /// Nothing is written unless the upstream call succeeds. A failed metrics
    /// write is logged and the response is still returned, without a
    /// `record_id`.
    pub async fn generate(
        &self,
        body: GenerateBody,
        origin: RequestOrigin,
    ) -> Result<GenerateResponse, ServiceError> {
        let request = body.validate(&self.config)?;

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.upstream_timeout,
            self.generator.generate(&request),
        )
        .await
        .map_err(|_| {
            ServiceError::upstream(
                None,
                format!(
                    "Gemini did not respond within {}s",
                    self.config.upstream_timeout.as_secs()
                ),
            )
        })??;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let record = NewMetricsRecord {
            endpoint: origin.endpoint,
            client_ip: origin.client_ip,
            prompt: request.prompt.clone(),
            response_text: result.text.clone(),
            model: request.model.clone(),
            usage: result.usage,
            token_source: result.token_source,
            temperature: request.config.temperature,
            max_output_tokens: request.config.max_output_tokens,
            latency_ms,
        };
        let record_id = match self.store.record(&record).await {
            Ok(id) => Some(id),
            Err(err) => {
                error!(error = %err, model = %request.model, "failed to record generation metrics");
                None
            }
        };

        info!(
            model = %request.model,
            prompt_tokens = result.usage.prompt_tokens,
            completion_tokens = result.usage.completion_tokens,
            token_source = result.token_source.as_str(),
            latency_ms,
            ?record_id,
            "generation complete"
        );

        Ok(GenerateResponse {
            text: result.text,
            model: request.model,
            metrics: result.usage,
            record_id,
        })
    }
}
