//! Activity reporting.
//!
//! `octo stats` summarizes the whole statistics store; `octo stats --user`
//! reports one user's totals, schedule histograms, and rankings. Hour
//! histograms are rotated into the user's local time when the entity store
//! knows their timezone offset.

use anyhow::{bail, Result};
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::store::{roll, StatsStore};

pub async fn run_stats(config: &Config, user: Option<String>) -> Result<()> {
    let store = StatsStore::new(db::connect_stats(config).await?);

    let result = match user {
        Some(username) => user_stats(config, &store, &username).await,
        None => global_stats(&store).await,
    };

    store.close().await;
    result
}

async fn global_stats(store: &StatsStore) -> Result<()> {
    println!("Octoscope — Global Statistics");
    println!("=============================");
    println!();
    println!("  total events:     {}", store.counter("total").await?);
    println!("  connections:      {}", store.counter("connection").await?);
    println!("  users ranked:     {}", store.ranking_card("user").await?);
    println!("  repos ranked:     {}", store.ranking_card("repo").await?);
    println!("  shards processed: {}", store.shard_count().await?);

    print_ranking("top events", &store.ranking_top("event", 5).await?);
    print_ranking("top languages", &store.ranking_top("lang", 5).await?);
    print_ranking("top repos", &store.ranking_top("repo", 5).await?);
    print_ranking("top connectors", &store.ranking_top("connection:user", 5).await?);

    Ok(())
}

async fn user_stats(config: &Config, store: &StatsStore, username: &str) -> Result<()> {
    let key = username.to_lowercase();

    let total = match store.ranking_score("user", &key).await? {
        Some(total) if total > 0 => total,
        _ => bail!("insufficient data for user '{}'", username),
    };

    let week = store.histogram(&format!("user:{}:day", key), 7).await?;
    let mut hours = store.histogram(&format!("user:{}:hour", key), 24).await?;

    // Rotate the hour schedule into local time when we know the offset.
    let timezone = lookup_timezone(config, &key).await?;
    if let Some(tz) = timezone {
        hours = roll(&hours, -tz);
    }

    println!("user {}", key);
    println!("  total: {}", total);
    println!("  week: {}", join_counts(&week));
    match timezone {
        Some(tz) => println!("  hours (utc{:+}): {}", tz, join_counts(&hours)),
        None => println!("  hours: {}", join_counts(&hours)),
    }

    print_ranking(
        "events",
        &store.ranking_top(&format!("user:{}:event", key), 5).await?,
    );
    print_ranking(
        "languages",
        &store.ranking_top(&format!("user:{}:lang", key), 5).await?,
    );
    print_ranking(
        "repos",
        &store.ranking_top(&format!("user:{}:repo", key), 5).await?,
    );
    print_ranking(
        "contributions",
        &store
            .ranking_top(&format!("user:{}:contribution", key), 5)
            .await?,
    );
    print_ranking(
        "connections",
        &store
            .ranking_top(&format!("user:{}:connection", key), 5)
            .await?,
    );

    let curses = store.ranking_top(&format!("user:{}:curse", key), 5).await?;
    if !curses.is_empty() {
        print_ranking("vocabulary", &curses);
    }

    Ok(())
}

fn print_ranking(title: &str, entries: &[(String, i64)]) {
    if entries.is_empty() {
        return;
    }
    println!("  {}:", title);
    for (member, score) in entries {
        println!("    {} {}", member, score);
    }
}

fn join_counts(counts: &[i64]) -> String {
    counts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Timezone offset (whole hours) from the entity store, when resolved.
async fn lookup_timezone(config: &Config, key: &str) -> Result<Option<i64>> {
    let pool = db::connect_entities(config).await?;
    let row = sqlx::query("SELECT timezone FROM users WHERE login = ? LIMIT 1")
        .bind(key)
        .fetch_optional(&pool)
        .await?;
    pool.close().await;
    Ok(row.and_then(|r| r.get::<Option<i64>, _>("timezone")))
}
