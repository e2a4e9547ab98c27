pub mod config;
pub mod docs;
pub mod error;
pub mod model;
pub mod server;
pub mod service;
pub mod store;

pub use config::AppConfig;
pub use error::ServiceError;
pub use model::{GeminiClient, GenerateBody, GenerateResponse, TextGenerator};
pub use server::build_router;
pub use service::GenerationService;
pub use store::{MetricsRecord, MetricsStore};
