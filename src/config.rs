use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use crate::error::ServiceError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub api_key: String,
    pub api_base: String,
    pub model_name: String,
    pub models: Vec<String>,
    pub database_path: PathBuf,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub upstream_timeout: Duration,
}

// Keeps the credential out of `?config` log fields.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("listen_addr", &self.listen_addr)
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model_name", &self.model_name)
            .field("models", &self.models)
            .field("database_path", &self.database_path)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Only `GEMINI_API_KEY` is mandatory; every other value falls back to its
    /// default when missing or unparseable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ServiceError::Configuration("GEMINI_API_KEY environment variable not set".into())
            })?;

        let listen_addr = lookup("SERVER_ADDR")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000));

        let api_base = lookup("GEMINI_API_BASE")
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let model_name = lookup("GEMINI_MODEL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut models: Vec<String> = lookup("GEMINI_MODELS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !models.contains(&model_name) {
            models.insert(0, model_name.clone());
        }

        let database_path = PathBuf::from(
            lookup("DATABASE_PATH").unwrap_or_else(|| "metrics.db".to_string()),
        );

        let temperature = lookup("DEFAULT_TEMPERATURE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.7);
        let max_output_tokens = lookup("DEFAULT_MAX_OUTPUT_TOKENS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1024);
        let upstream_timeout = lookup("UPSTREAM_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        Ok(Self {
            listen_addr,
            api_key,
            api_base,
            model_name,
            models,
            database_path,
            temperature,
            max_output_tokens,
            upstream_timeout,
        })
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}
