use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, Uri},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::{
    docs::ApiDoc,
    error::ServiceError,
    model::{GenerateBody, GenerateResponse},
    service::{GenerationService, RequestOrigin},
    store::MetricsRecord,
};

const DEFAULT_METRICS_LIMIT: u32 = 20;
const MAX_METRICS_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerationService>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub limit: Option<u32>,
}

pub fn build_router(service: Arc<GenerationService>) -> Router {
    let state = AppState {
        service,
        started_at: Instant::now(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/docs", get(docs))
        .route("/gemini/generate", post(generate))
        .route("/metrics", get(recent_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Liveness check; never touches upstream or storage.
#[utoipa::path(
    get,
    path = "/health",
    tag = "service",
    responses((status = 200, description = "Process is alive", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[utoipa::path(
    get,
    path = "/docs",
    tag = "service",
    responses((status = 200, description = "OpenAPI 3 description of this API"))
)]
pub async fn docs() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    post,
    path = "/gemini/generate",
    tag = "gemini",
    request_body = GenerateBody,
    responses(
        (status = 200, description = "Generated text with token usage", body = GenerateResponse),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 413, description = "Request body exceeds the size limit", body = ErrorResponse),
        (status = 429, description = "Upstream rate limit or quota exceeded", body = ErrorResponse),
        (status = 500, description = "Upstream or configuration failure", body = ErrorResponse)
    )
)]
pub async fn generate(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let Json(body) = payload.map_err(json_rejection)?;
    let origin = RequestOrigin {
        endpoint: uri.path().to_string(),
        client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
    };
    let response = state.service.generate(body, origin).await?;
    Ok(Json(response))
}

fn json_rejection(rejection: JsonRejection) -> ServiceError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(rejection.body_text())
    } else {
        ServiceError::Validation(rejection.body_text())
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "metrics",
    params(("limit" = Option<u32>, Query, description = "Number of records, newest first (default 20, max 500)")),
    responses(
        (status = 200, description = "Most recent metrics records", body = Vec<MetricsRecord>),
        (status = 400, description = "Invalid query string", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    )
)]
pub async fn recent_metrics(
    State(state): State<AppState>,
    query: Result<Query<MetricsQuery>, QueryRejection>,
) -> Result<Json<Vec<MetricsRecord>>, ServiceError> {
    let Query(query) =
        query.map_err(|rejection| ServiceError::Validation(rejection.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_METRICS_LIMIT)
        .clamp(1, MAX_METRICS_LIMIT);
    let records = state.service.store().list_recent(limit).await?;
    Ok(Json(records))
}
