//! PostgreSQL rate-limit store
//!
//! Shares rate-limit windows between every process connected to the same
//! database. One `INSERT ... ON CONFLICT DO UPDATE ... RETURNING` statement
//! does the rollover check, the increment and the read, so the row lock
//! taken by the upsert orders racing processes.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};

use super::store::{window_reply, RateLimitStore, ReplyValue, StoreError};

/// Table holding one row per rate-limit key
pub const WINDOW_TABLE: &str = "dynapool_rate_limit_windows";

/// PostgreSQL implementation of [`RateLimitStore`]
///
/// # Example
///
/// ```ignore
/// use dynapool::limiter::PostgresRateLimitStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresRateLimitStore::new(pool);
/// store.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresRateLimitStore {
    pool: PgPool,
}

impl PostgresRateLimitStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a small connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!("Failed to connect to rate-limit database: {}", e);
                StoreError::Unavailable(e.to_string())
            })?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the window table if it does not exist
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dynapool_rate_limit_windows (
                key TEXT PRIMARY KEY,
                window_start TIMESTAMPTZ NOT NULL,
                hits BIGINT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create rate-limit table: {}", e);
            StoreError::Database(e.to_string())
        })?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_dynapool_rate_limit_windows_expires
                ON dynapool_rate_limit_windows (expires_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create rate-limit index: {}", e);
            StoreError::Database(e.to_string())
        })?;

        info!(table = WINDOW_TABLE, "Rate-limit schema ready");
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for PostgresRateLimitStore {
    #[instrument(skip(self))]
    async fn eval_window(
        &self,
        key: &str,
        interval: Duration,
        limit: i64,
    ) -> Result<Vec<ReplyValue>, StoreError> {
        if limit <= 0 {
            return Ok(window_reply(key, 0, 0));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO dynapool_rate_limit_windows AS w (key, window_start, hits, expires_at)
            VALUES ($1, now(), 1, now() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE SET
                window_start = CASE WHEN w.expires_at <= now() THEN now() ELSE w.window_start END,
                hits = CASE
                    WHEN w.expires_at <= now() THEN 1
                    ELSE LEAST(w.hits, $3) + 1
                END,
                expires_at = CASE
                    WHEN w.expires_at <= now() THEN now() + make_interval(secs => $2)
                    ELSE w.expires_at
                END
            RETURNING
                w.key,
                (EXTRACT(EPOCH FROM (now() - w.window_start)) * 1000)::BIGINT AS elapsed_ms,
                ($3 - w.hits + 1)::BIGINT AS remaining
            "#,
        )
        .bind(key)
        .bind(interval.as_secs_f64())
        .bind(limit)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to evaluate rate-limit window: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let key: String = row
            .try_get("key")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let elapsed_ms: i64 = row
            .try_get("elapsed_ms")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let remaining: i64 = row
            .try_get("remaining")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(key = %key, elapsed_ms, remaining, "Evaluated rate-limit window");
        Ok(window_reply(&key, elapsed_ms, remaining))
    }

    #[instrument(skip(self))]
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM dynapool_rate_limit_windows
            WHERE expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to purge rate-limit windows: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(result.rows_affected())
    }
}
