use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create both schemas. Idempotent — `octo init` can run any number of times.
pub async fn run_migrations(config: &Config) -> Result<()> {
    migrate_entities(config).await?;
    migrate_stats(config).await?;
    Ok(())
}

async fn migrate_entities(config: &Config) -> Result<()> {
    let pool = db::connect_entities(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            user_type TEXT,
            name TEXT,
            login TEXT NOT NULL,
            location TEXT,
            lat REAL,
            lng REAL,
            avatar_url TEXT,
            etag TEXT,
            timezone INTEGER,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY,
            name TEXT,
            fullname TEXT,
            description TEXT,
            language TEXT,
            fork INTEGER,
            etag TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            star_count INTEGER,
            watcher_count INTEGER,
            fork_count INTEGER,
            issues_count INTEGER,
            last_updated INTEGER,
            owner_id INTEGER REFERENCES users(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Optional replay-safe event log (one row per upstream event id).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            day INTEGER NOT NULL,
            hour INTEGER NOT NULL,
            user_id INTEGER,
            repo_id INTEGER
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_login ON users(login)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repos_fullname ON repos(fullname)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_user_id ON events(user_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_repo_id ON events(repo_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}

async fn migrate_stats(config: &Config) -> Result<()> {
    let pool = db::connect_stats(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counters (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rankings (
            key TEXT NOT NULL,
            member TEXT NOT NULL,
            score INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (key, member)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS histograms (
            key TEXT NOT NULL,
            slot INTEGER NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (key, slot)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Shard ledger: which shards already fed the counters. Written in the
    // same transaction as the shard's statistics flush.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shards (
            name TEXT PRIMARY KEY,
            processed_at INTEGER NOT NULL,
            events INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rankings_key_score ON rankings(key, score DESC)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
