use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::Config;
use crate::utils::error::AppResult;

/// Embedded schema migrations from `./migrations`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

pub async fn connect(config: &Config) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Successfully connected to database"
    );

    if config.run_migrations {
        migrate(&pool).await?;
    }

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> AppResult<()> {
    MIGRATOR.run(pool).await?;
    info!("Migrations run successfully");
    Ok(())
}
