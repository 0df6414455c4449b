//! # Database Migrations
//!
//! Schema migrations are embedded from `migrations/` at build time and
//! applied by sqlx, which tracks applied versions in `_sqlx_migrations` and
//! serializes concurrent runners with an advisory lock.

use sqlx::PgPool;

use crate::error::Result;

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    pub async fn run_all(pool: &PgPool) -> Result<()> {
        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations").run(pool).await?;
        tracing::info!("Database migrations complete");
        Ok(())
    }
}
