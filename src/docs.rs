use utoipa::OpenApi;

use crate::{
    model::{GenerateBody, GenerateResponse, GenerationConfigBody, PromptBody, TokenUsage},
    server::{ErrorResponse, HealthResponse},
    store::MetricsRecord,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gemini Proxy",
        description = "Forwards text-generation requests to the Gemini API and records token usage"
    ),
    paths(
        crate::server::health,
        crate::server::docs,
        crate::server::generate,
        crate::server::recent_metrics,
    ),
    components(schemas(
        GenerateBody,
        PromptBody,
        GenerationConfigBody,
        GenerateResponse,
        TokenUsage,
        MetricsRecord,
        HealthResponse,
        ErrorResponse,
    )),
    tags(
        (name = "gemini", description = "Text generation"),
        (name = "metrics", description = "Recorded token usage"),
        (name = "service", description = "Health and documentation")
    )
)]
pub struct ApiDoc;
