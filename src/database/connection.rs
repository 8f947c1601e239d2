use crate::config::DatabaseConfig;
use crate::config::loader::mask_database_url;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Owned connection pool built from `database` configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        info!(
            database_url = %mask_database_url(&config.url),
            max_connections = config.max_connections,
            "Database pool established"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query; run once at startup before wiring the store.
    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let reachable: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(reachable == 1)
    }
}
