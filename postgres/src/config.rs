//! Connection configuration for the `PostgreSQL` stores.

use raffle_alloc_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::env;

/// Connection settings, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection string (`DATABASE_URL`)
    pub database_url: String,
    /// Pool size cap (`RAFFLE_DB_MAX_CONNECTIONS`, default 10)
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` when `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, StoreError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| StoreError::Database("DATABASE_URL is not set".to_string()))?;
        let max_connections = env::var("RAFFLE_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// Open a connection pool with these settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` when the pool cannot connect.
    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|e| StoreError::Database(format!("failed to connect: {e}")))
    }
}
