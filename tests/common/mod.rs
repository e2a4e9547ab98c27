//! Shared fixtures for router-level tests.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::connect_info::MockConnectInfo,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use gemini_proxy::{
    AppConfig, GenerationService, MetricsStore, ServiceError, TextGenerator, build_router,
    model::{GenerationRequest, GenerationResult, TokenSource, TokenUsage, estimate_tokens},
};

/// Replies with `Echo: <prompt>` and whitespace-estimated counts.
#[derive(Default)]
pub struct EchoGenerator {
    calls: AtomicUsize,
}

impl EchoGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = format!("Echo: {}", request.prompt);
        Ok(GenerationResult {
            usage: TokenUsage::new(estimate_tokens(&request.prompt), estimate_tokens(&text)),
            text,
            token_source: TokenSource::Estimated,
        })
    }
}

/// Fails every call with the error produced by `make`.
pub struct FailingGenerator {
    make: fn() -> ServiceError,
}

impl FailingGenerator {
    pub fn new(make: fn() -> ServiceError) -> Self {
        Self { make }
    }
}

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _: &GenerationRequest) -> Result<GenerationResult, ServiceError> {
        Err((self.make)())
    }
}

/// Sleeps well past any test timeout before answering.
pub struct StalledGenerator;

#[async_trait]
impl TextGenerator for StalledGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, ServiceError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        EchoGenerator::default().generate(request).await
    }
}

pub fn test_config(extra: &[(&str, &str)]) -> AppConfig {
    let extra: Vec<(String, String)> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|key| {
        if key == "GEMINI_API_KEY" {
            return Some("test-key".to_string());
        }
        extra.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    })
    .expect("test config")
}

pub struct TestApp {
    pub router: Router,
    pub service: Arc<GenerationService>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self::with_config(generator, test_config(&[])).await
    }

    pub async fn with_config(generator: Arc<dyn TextGenerator>, config: AppConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetricsStore::open(&dir.path().join("metrics.db"))
            .await
            .expect("open store");
        let service = Arc::new(GenerationService::new(Arc::new(config), generator, store));
        Self {
            router: build_router(service.clone()),
            service,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &MetricsStore {
        self.service.store()
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).expect("build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        Self::dispatch(self.router.clone(), request).await
    }

    /// Sends the request as if it arrived from `peer`.
    pub async fn send_from(&self, peer: SocketAddr, request: Request<Body>) -> (StatusCode, Value) {
        Self::dispatch(self.router.clone().layer(MockConnectInfo(peer)), request).await
    }

    async fn dispatch(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}
