use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("request body too large: {0}")]
    PayloadTooLarge(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{}", upstream_message(.status, .message))]
    Upstream { status: Option<u16>, message: String },
    #[error("upstream rate limit: {0}")]
    RateLimited(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

fn upstream_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("upstream error ({code}): {message}"),
        None => format!("upstream error: {message}"),
    }
}

impl ServiceError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        ServiceError::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::Configuration(_)
            | ServiceError::Upstream { .. }
            | ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client.
    fn public_message(&self) -> String {
        match self {
            ServiceError::Configuration(_) => "service is not configured correctly".to_string(),
            ServiceError::Storage(_) => "metrics storage is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
        });

        (status, axum::Json(body)).into_response()
    }
}
