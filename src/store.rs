//! Persistent per-request token metrics.
//!
//! One SQLite table, `generation_metrics`, written append-only. Concurrent
//! writers are serialized by SQLite itself; the pool runs in WAL mode with a
//! busy timeout so simultaneous requests wait instead of failing.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::ServiceError,
    model::{TokenSource, TokenUsage},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 5;

/// Fields supplied by the caller for a new row. `id` and `created_at` are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMetricsRecord {
    pub endpoint: String,
    pub client_ip: Option<String>,
    pub prompt: String,
    pub response_text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub token_source: TokenSource,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MetricsRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub endpoint: String,
    /// Absent when the server runs without peer address information.
    pub client_ip: Option<String>,
    pub prompt: String,
    pub response_text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub latency_ms: i64,
    /// `provider` or `estimated`.
    pub token_source: String,
}

#[derive(Clone)]
pub struct MetricsStore {
    pool: SqlitePool,
}

impl MetricsStore {
    /// Opens (creating if needed) the database file and ensures the schema.
    pub async fn open(path: &Path) -> Result<Self, ServiceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        info!(path = %path.display(), "metrics store ready");
        Ok(store)
    }

    /// Wraps an existing pool. Call [`MetricsStore::initialize`] before use.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the table and index. Safe to run on every start.
    pub async fn initialize(&self) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generation_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                client_ip TEXT,
                prompt TEXT NOT NULL,
                response_text TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                temperature REAL NOT NULL,
                max_output_tokens INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                token_source TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generation_metrics_created_at \
             ON generation_metrics(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Appends one row and returns its identifier.
    pub async fn record(&self, record: &NewMetricsRecord) -> Result<i64, ServiceError> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_metrics (
                created_at, endpoint, client_ip, prompt, response_text, model,
                prompt_tokens, completion_tokens, total_tokens,
                temperature, max_output_tokens, latency_ms, token_source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(&record.endpoint)
        .bind(&record.client_ip)
        .bind(&record.prompt)
        .bind(&record.response_text)
        .bind(&record.model)
        .bind(record.usage.prompt_tokens)
        .bind(record.usage.completion_tokens)
        .bind(record.usage.total_tokens)
        .bind(record.temperature)
        .bind(record.max_output_tokens)
        .bind(record.latency_ms)
        .bind(record.token_source.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<MetricsRecord>, ServiceError> {
        let row = sqlx::query("SELECT * FROM generation_metrics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Most recent rows first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<MetricsRecord>, ServiceError> {
        let rows = sqlx::query("SELECT * FROM generation_metrics ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn count(&self) -> Result<i64, ServiceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM generation_metrics")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: &SqliteRow) -> Result<MetricsRecord, ServiceError> {
    Ok(MetricsRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        endpoint: row.try_get("endpoint")?,
        client_ip: row.try_get("client_ip")?,
        prompt: row.try_get("prompt")?,
        response_text: row.try_get("response_text")?,
        model: row.try_get("model")?,
        prompt_tokens: row.try_get("prompt_tokens")?,
        completion_tokens: row.try_get("completion_tokens")?,
        total_tokens: row.try_get("total_tokens")?,
        temperature: row.try_get("temperature")?,
        max_output_tokens: row.try_get("max_output_tokens")?,
        latency_ms: row.try_get("latency_ms")?,
        token_source: row.try_get("token_source")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> MetricsStore {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = MetricsStore::from_pool(pool);
        store.initialize().await.unwrap();
        store
    }

    fn sample(prompt_tokens: u32, completion_tokens: u32) -> NewMetricsRecord {
        NewMetricsRecord {
            endpoint: "/gemini/generate".into(),
            client_ip: Some("10.0.0.7".into()),
            prompt: "Say hello".into(),
            response_text: "Hello there!".into(),
            model: "gemini-1.5-flash".into(),
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
            token_source: TokenSource::Provider,
            temperature: 0.2,
            max_output_tokens: 10,
            latency_ms: 42,
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = memory_store().await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn record_round_trips_all_fields() {
        let store = memory_store().await;
        let before = Utc::now();
        let id = store.record(&sample(3, 7)).await.unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.endpoint, "/gemini/generate");
        assert_eq!(stored.client_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(stored.prompt, "Say hello");
        assert_eq!(stored.response_text, "Hello there!");
        assert_eq!(stored.model, "gemini-1.5-flash");
        assert_eq!(stored.prompt_tokens, 3);
        assert_eq!(stored.completion_tokens, 7);
        assert_eq!(stored.total_tokens, 10);
        assert_eq!(stored.temperature, 0.2);
        assert_eq!(stored.max_output_tokens, 10);
        assert_eq!(stored.latency_ms, 42);
        assert_eq!(stored.token_source, "provider");
        assert!(stored.created_at >= before);
    }

    #[tokio::test]
    async fn client_ip_is_optional() {
        let store = memory_store().await;
        let record = NewMetricsRecord {
            client_ip: None,
            ..sample(1, 1)
        };
        let id = store.record(&record).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().client_ip, None);
    }

    #[tokio::test]
    async fn identifiers_increase_with_each_insert() {
        let store = memory_store().await;
        let mut ids = Vec::new();
        for n in 1..=5 {
            ids.push(store.record(&sample(n, n)).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let recent = store.list_recent(10).await.unwrap();
        let recent_ids: Vec<i64> = recent.iter().rev().map(|r| r.id).collect();
        assert_eq!(recent_ids, ids);
        assert_eq!(recent[0].prompt_tokens, 5);

        assert_eq!(store.list_recent(2).await.unwrap().len(), 2);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn missing_row_is_none() {
        let store = memory_store().await;
        assert!(store.get(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_pool_reports_storage_error() {
        let store = memory_store().await;
        store.close().await;
        let err = store.record(&sample(1, 1)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
    }

    #[tokio::test]
    async fn open_creates_file_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");

        let store = MetricsStore::open(&path).await.unwrap();
        let id = store.record(&sample(2, 2)).await.unwrap();
        store.close().await;
        assert!(path.exists());

        let reopened = MetricsStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert!(reopened.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::open(&dir.path().join("metrics.db"))
            .await
            .unwrap();

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.record(&sample(n, 1)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 20);
    }
}
