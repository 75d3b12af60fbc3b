use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Connect to the entity store (users, repos, events).
pub async fn connect_entities(config: &Config) -> Result<SqlitePool> {
    connect(&config.db.path).await
}

/// Connect to the counter/histogram store.
pub async fn connect_stats(config: &Config) -> Result<SqlitePool> {
    connect(&config.stats.path).await
}

async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        // Concurrent shards each flush in their own transaction; wait for
        // the writer lock instead of surfacing SQLITE_BUSY.
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
