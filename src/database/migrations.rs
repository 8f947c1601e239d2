//! # Database Migrations
//!
//! Schema migrations are embedded from `migrations/` at compile time and
//! applied through sqlx's migrator, which serializes concurrent runners with
//! a PostgreSQL advisory lock and records applied versions in
//! `_sqlx_migrations`.

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::PgPool;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration in version order
    pub async fn run_all(pool: &PgPool) -> Result<(), MigrateError> {
        MIGRATOR.run(pool).await?;
        info!(
            migrations = MIGRATOR.iter().count(),
            "Database migrations up to date"
        );
        Ok(())
    }

    /// Whether the instance table exists
    pub async fn schema_ready(pool: &PgPool) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT FROM information_schema.tables \
             WHERE table_name = 'workflow_instances')",
        )
        .fetch_one(pool)
        .await
    }
}
