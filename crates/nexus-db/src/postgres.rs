//! PostgreSQL connection helpers.

use anyhow::Result;
use sqlx::PgPool;

/// Verify the database is reachable before serving resolutions from it.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
