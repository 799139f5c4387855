//! Repository layer for database operations

pub mod exclusions;
pub mod id_mappings;
pub mod merge_requests;
pub mod selections;
pub mod snapshots;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Open (creating if needed) the database file and run pending migrations
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    log::debug!("Database migrations up to date");
    Ok(())
}

/// Fresh in-memory database; one connection, since each one is its own database
pub async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("Invalid in-memory database url")?
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Stored form of an optional locale
pub(crate) fn locale_column(locale: Option<&str>) -> &str {
    locale.unwrap_or("")
}

pub(crate) fn locale_from_column(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
