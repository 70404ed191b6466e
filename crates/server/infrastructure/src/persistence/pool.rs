//! PostgreSQL connection pool
//!
//! One pool per process, shared by the outbox repository, the unit of work
//! and the notification listener.
//!
//! ```rust,ignore
//! let pool = DatabasePool::connect(&config.database).await?;
//! let outbox = PostgresOutboxRepository::new(pool.pg_pool());
//! let unit_of_work = PostgresUnitOfWork::new(pool.pg_pool());
//! ```

use std::time::Duration;

use library_shared::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::info;

/// Pool tuning derived from [`DatabaseConfig`]
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Connection acquisition timeout
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<&DatabaseConfig> for DatabasePoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.pool_size,
            min_connections: config.min_idle,
            connection_timeout: config.connect_timeout(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Open a pool against `url`
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be reached within the acquisition
    /// timeout or the URL is malformed.
    pub async fn new(url: &str, config: DatabasePoolConfig) -> Result<Self, PoolError> {
        info!(
            min = config.min_connections,
            max = config.max_connections,
            timeout = ?config.connection_timeout,
            "Creating PostgreSQL pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(url)
            .await
            .map_err(|e| PoolError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PoolError> {
        Self::new(&config.url, DatabasePoolConfig::from(config)).await
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub fn pg_pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),
}
