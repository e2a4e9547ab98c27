use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gemini_proxy::{AppConfig, GeminiClient, GenerationService, MetricsStore, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = dotenvy::dotenv();
    init_tracing();

    if let Ok(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(?config, "starting gemini proxy");

    let generator = Arc::new(GeminiClient::new(config.as_ref())?);
    let store = MetricsStore::open(&config.database_path).await?;
    let service = Arc::new(GenerationService::new(config.clone(), generator, store));
    let router = build_router(service);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
