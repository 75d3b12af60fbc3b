//! Entity-store writes.
//!
//! Applies one shard's accumulated partial records to the `users` and
//! `repos` tables under the coalesce rule: a present incoming field
//! overwrites, an absent one preserves the stored value, and unknown ids are
//! inserted with `active = TRUE`. The whole batch is one transaction with
//! row-level conditional upserts keyed by id, so concurrent shards cannot
//! lose updates to the same row — SQLite admits one writing transaction at a
//! time and each upsert re-reads the committed row.
//!
//! Upserts are idempotent: replaying a shard leaves every row unchanged.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::EventObservation;
use crate::parse::ShardBatch;

/// Row counts from one flush.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlushSummary {
    pub users: usize,
    pub repos: usize,
}

/// Upsert every user and repository accumulated for one shard.
pub async fn flush_entities(pool: &SqlitePool, batch: &ShardBatch) -> Result<FlushSummary> {
    let mut tx = pool.begin().await.context("entity flush begin failed")?;

    for user in batch.users.values() {
        sqlx::query(
            r#"
            INSERT INTO users (id, user_type, name, login, location, avatar_url, active)
            VALUES (?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                user_type = COALESCE(excluded.user_type, users.user_type),
                name = COALESCE(excluded.name, users.name),
                login = excluded.login,
                location = COALESCE(excluded.location, users.location),
                avatar_url = COALESCE(excluded.avatar_url, users.avatar_url)
            "#,
        )
        .bind(user.id)
        .bind(&user.user_type)
        .bind(&user.name)
        // The login is the case-insensitive identity key; the store carries
        // it lowercased and uniqueness rests here, not on a constraint.
        .bind(user.login.to_lowercase())
        .bind(&user.location)
        .bind(&user.avatar_url)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert user {}", user.id))?;
    }

    for repo in batch.repos.values() {
        sqlx::query(
            r#"
            INSERT INTO repos (id, name, fullname, description, language, fork,
                               star_count, watcher_count, fork_count, issues_count,
                               last_updated, owner_id, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                fullname = excluded.fullname,
                description = COALESCE(excluded.description, repos.description),
                language = COALESCE(excluded.language, repos.language),
                fork = COALESCE(excluded.fork, repos.fork),
                star_count = COALESCE(excluded.star_count, repos.star_count),
                watcher_count = COALESCE(excluded.watcher_count, repos.watcher_count),
                fork_count = COALESCE(excluded.fork_count, repos.fork_count),
                issues_count = COALESCE(excluded.issues_count, repos.issues_count),
                last_updated = COALESCE(excluded.last_updated, repos.last_updated),
                owner_id = COALESCE(excluded.owner_id, repos.owner_id)
            "#,
        )
        .bind(repo.id)
        .bind(&repo.name)
        .bind(&repo.fullname)
        .bind(&repo.description)
        .bind(&repo.language)
        .bind(repo.fork)
        .bind(repo.star_count)
        .bind(repo.watcher_count)
        .bind(repo.fork_count)
        .bind(repo.issues_count)
        .bind(repo.last_updated.map(|dt| dt.timestamp()))
        .bind(repo.owner_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert repo {}", repo.id))?;
    }

    tx.commit().await.context("entity flush commit failed")?;

    Ok(FlushSummary {
        users: batch.users.len(),
        repos: batch.repos.len(),
    })
}

/// Persist one row per event id. `INSERT OR IGNORE` keeps replays from
/// duplicating rows; events without an upstream id are not stored.
pub async fn insert_events(pool: &SqlitePool, observations: &[EventObservation]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for obs in observations {
        let Some(event_id) = &obs.event_id else {
            continue;
        };
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO events (id, event_type, created_at, day, hour, user_id, repo_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(&obs.evttype)
        .bind(obs.created_at.timestamp())
        .bind(obs.weekday)
        .bind(obs.hour)
        .bind(obs.actor_id)
        .bind(obs.repo_id)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected() as usize;
    }

    tx.commit().await?;
    Ok(inserted)
}
