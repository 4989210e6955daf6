//! Versioned schema migrations.
//!
//! The numbered files under `core-cache/migrations/` are embedded at compile
//! time and applied in order at open. sqlx records each applied version in
//! `_sqlx_migrations`; a database carrying a version this build does not
//! know is refused rather than downgraded.

use crate::error::{CacheError, Result};
use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Highest schema version this build knows how to produce.
pub fn latest_version() -> i64 {
    MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Highest successfully applied version.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let version: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(version)
}

/// Bring the database up to [`latest_version`].
pub async fn migrate(pool: &SqlitePool) -> Result<i64> {
    info!("Running database migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        CacheError::Migration(e.to_string())
    })?;

    let version = current_version(pool).await?;
    info!(version, "Database schema is up to date");
    Ok(version)
}
