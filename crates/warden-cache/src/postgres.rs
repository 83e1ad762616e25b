//! PostgreSQL cache backend
//!
//! Survives process restarts; expired rows are ignored on read and swept
//! opportunistically on write.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};

/// PostgreSQL-backed cache
#[derive(Debug, Clone)]
pub struct PostgresCacheBackend {
    pool: PgPool,
}

impl PostgresCacheBackend {
    /// Connect and make sure the cache table exists
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> CacheResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let backend = Self { pool };
        backend.initialize_schema().await?;
        Ok(backend)
    }

    async fn initialize_schema(&self) -> CacheResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS warden_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS warden_cache_expires_at ON warden_cache(expires_at);"#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl CacheBackend for PostgresCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM warden_cache WHERE key = $1 AND expires_at > $2")
            .bind(key)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| CacheError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO warden_cache (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now + ttl)
        .execute(&self.pool)
        .await
        .map_err(|e| CacheError::Backend(e.to_string()))?;

        if let Err(e) = sqlx::query("DELETE FROM warden_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
        {
            tracing::debug!(error = %e, "Expired cache sweep failed");
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let result = sqlx::query("DELETE FROM warden_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}
