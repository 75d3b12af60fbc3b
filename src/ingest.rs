//! Ingestion orchestration.
//!
//! Coordinates the full pipeline for a set of shards: download (or local
//! read) → parse/normalize → entity flush → statistics flush. Shards are
//! processed concurrently up to `[ingest] parallelism`, each one flushing its
//! entities and statistics in its own transactions, so a shard that fails
//! mid-way leaves nothing half-applied and can simply be retried.
//!
//! The shard ledger in the statistics store makes reprocessing safe: a shard
//! already marked there is skipped unless `--force` is given. Forced replays
//! leave entity rows unchanged (upserts are idempotent) but double every
//! statistics counter the shard touches — that asymmetry is inherent to the
//! counters and the reason the ledger exists.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::archive;
use crate::config::Config;
use crate::db;
use crate::entities;
use crate::lexicon::Lexicon;
use crate::models::ShardId;
use crate::parse;
use crate::store::{StatsBatch, StatsStore};

/// Outcome of one processed shard, for the final summary.
#[derive(Debug)]
struct ShardReport {
    name: String,
    events: usize,
    skipped_lines: usize,
    ignored: usize,
    users: usize,
    repos: usize,
    events_stored: usize,
}

/// Resolve CLI date arguments into a shard list. `hours` empty means all 24.
pub fn resolve_shards(
    date: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
    hours: &[u32],
) -> Result<Vec<ShardId>> {
    if let Some(bad) = hours.iter().find(|&&h| h > 23) {
        bail!("--hour must be in 0..=23, got {}", bad);
    }

    let parse_date = |raw: &str| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{}', expected YYYY-MM-DD", raw))
    };

    let (start, end) = match (date, since, until) {
        (Some(d), None, None) => {
            let d = parse_date(d)?;
            (d, d)
        }
        (None, Some(s), u) => {
            let s = parse_date(s)?;
            (s, u.map(parse_date).transpose()?.unwrap_or(s))
        }
        (None, None, Some(u)) => {
            let u = parse_date(u)?;
            (u, u)
        }
        (None, None, None) => return Ok(Vec::new()),
        _ => bail!("--date cannot be combined with --since/--until"),
    };

    if end < start {
        bail!("--until ({}) is before --since ({})", end, start);
    }

    let mut shards = Vec::new();
    let mut day = start;
    while day <= end {
        if hours.is_empty() {
            shards.extend(archive::day_shards(day.year(), day.month(), day.day()));
        } else {
            for &hour in hours {
                shards.push(ShardId {
                    year: day.year(),
                    month: day.month(),
                    day: day.day(),
                    hour,
                });
            }
        }
        day = day.succ_opt().expect("date overflow");
    }
    Ok(shards)
}

pub async fn run_ingest(
    config: &Config,
    shards: Vec<ShardId>,
    files: Vec<PathBuf>,
    force: bool,
) -> Result<()> {
    if shards.is_empty() && files.is_empty() {
        bail!("nothing to ingest — pass --date/--since/--until or --file");
    }

    let entities_pool = db::connect_entities(config).await?;
    let stats = Arc::new(StatsStore::new(db::connect_stats(config).await?));
    let lexicon = if config.lexicon.enabled {
        Some(Arc::new(Lexicon::bundled()?))
    } else {
        None
    };

    let requested = shards.len() + files.len();
    let mut skipped_ledger = 0usize;
    let mut failures: Vec<(String, String)> = Vec::new();
    let mut payloads: Vec<(String, Vec<u8>)> = Vec::new();

    // Ledger pre-filter so already-processed shards are not even downloaded.
    let mut pending = Vec::new();
    for shard in shards {
        if !force && stats.is_processed(&shard.name()).await? {
            skipped_ledger += 1;
        } else {
            pending.push(shard);
        }
    }

    if !pending.is_empty() {
        let outcome = archive::fetch_shards(&config.archive, &pending).await?;
        for (shard, reason) in outcome.failures {
            failures.push((shard.name(), reason));
        }
        for (shard, bytes) in outcome.fetched {
            payloads.push((shard.name(), bytes));
        }
    }

    for file in files {
        let name = shard_name_for_file(&file);
        if !force && stats.is_processed(&name).await? {
            skipped_ledger += 1;
            continue;
        }
        match std::fs::read(&file) {
            Ok(bytes) => payloads.push((name, bytes)),
            Err(e) => failures.push((name, format!("read failed: {}", e))),
        }
    }

    // Process shards concurrently, bounded by the configured parallelism.
    let semaphore = Arc::new(Semaphore::new(config.ingest.parallelism));
    let mut tasks = JoinSet::new();
    for (name, bytes) in payloads {
        let semaphore = semaphore.clone();
        let entities_pool = entities_pool.clone();
        let stats = stats.clone();
        let lexicon = lexicon.clone();
        let persist_events = config.ingest.persist_events;

        tasks.spawn(async move {
            let _permit = semaphore.acquire().await.expect("ingest semaphore closed");
            let report =
                process_shard(&name, bytes, &entities_pool, &stats, lexicon, persist_events).await;
            (name, report)
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (name, result) = joined?;
        match result {
            Ok(report) => {
                println!(
                    "  processed {}: {} events, {} users, {} repos",
                    report.name, report.events, report.users, report.repos
                );
                reports.push(report);
            }
            Err(e) => failures.push((name, format!("{:#}", e))),
        }
    }
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    failures.sort();

    entities_pool.close().await;

    let events: usize = reports.iter().map(|r| r.events).sum();
    let skipped_lines: usize = reports.iter().map(|r| r.skipped_lines).sum();
    let ignored: usize = reports.iter().map(|r| r.ignored).sum();
    let users: usize = reports.iter().map(|r| r.users).sum();
    let repos: usize = reports.iter().map(|r| r.repos).sum();
    let events_stored: usize = reports.iter().map(|r| r.events_stored).sum();

    println!("ingest");
    println!("  shards requested: {}", requested);
    println!("  shards processed: {}", reports.len());
    if skipped_ledger > 0 {
        println!("  shards skipped (already processed): {}", skipped_ledger);
    }
    for (name, reason) in &failures {
        println!("  shard {} failed: {}", name, reason);
    }
    println!(
        "  events: {} ({} lines skipped, {} ignored)",
        events, skipped_lines, ignored
    );
    println!("  users upserted: {}", users);
    println!("  repos upserted: {}", repos);
    if config.ingest.persist_events {
        println!("  event rows stored: {}", events_stored);
    }
    println!("ok");

    if reports.is_empty() && !failures.is_empty() {
        bail!("all {} attempted shards failed", failures.len());
    }
    Ok(())
}

async fn process_shard(
    name: &str,
    bytes: Vec<u8>,
    entities_pool: &sqlx::SqlitePool,
    stats: &StatsStore,
    lexicon: Option<Arc<Lexicon>>,
    persist_events: bool,
) -> Result<ShardReport> {
    // JSON decode is the CPU-heavy part; keep it off the async runtime.
    let shard_name = name.to_string();
    let batch = tokio::task::spawn_blocking(move || parse::parse_shard(&shard_name, &bytes))
        .await
        .context("parse task panicked")??;

    let flush = entities::flush_entities(entities_pool, &batch)
        .await
        .with_context(|| format!("entity flush failed for shard {}", name))?;

    let mut stats_batch = StatsBatch::default();
    for obs in &batch.observations {
        stats_batch.record(obs, lexicon.as_deref());
    }
    stats
        .flush(&stats_batch, name, batch.parsed)
        .await
        .with_context(|| format!("statistics flush failed for shard {}", name))?;

    let events_stored = if persist_events {
        entities::insert_events(entities_pool, &batch.observations)
            .await
            .with_context(|| format!("event persistence failed for shard {}", name))?
    } else {
        0
    };

    Ok(ShardReport {
        name: name.to_string(),
        events: batch.parsed,
        skipped_lines: batch.skipped,
        ignored: batch.ignored,
        users: flush.users,
        repos: flush.repos,
        events_stored,
    })
}

/// Ledger key for a local shard file: the file name without `.json.gz`.
fn shard_name_for_file(path: &std::path::Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.trim_end_matches(".gz")
        .trim_end_matches(".json")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_single_date() {
        let shards = resolve_shards(Some("2013-03-01"), None, None, &[]).unwrap();
        assert_eq!(shards.len(), 24);
    }

    #[test]
    fn test_resolve_range_with_hours() {
        let shards =
            resolve_shards(None, Some("2013-03-01"), Some("2013-03-03"), &[10, 11]).unwrap();
        assert_eq!(shards.len(), 6);
        assert_eq!(shards[0].name(), "2013-03-01-10");
        assert_eq!(shards[5].name(), "2013-03-03-11");
    }

    #[test]
    fn test_resolve_rejects_bad_input() {
        assert!(resolve_shards(Some("2013-3-1x"), None, None, &[]).is_err());
        assert!(resolve_shards(None, Some("2013-03-02"), Some("2013-03-01"), &[]).is_err());
        assert!(resolve_shards(Some("2013-03-01"), Some("2013-03-01"), None, &[]).is_err());
        assert!(resolve_shards(Some("2013-03-01"), None, None, &[24]).is_err());
    }

    #[test]
    fn test_resolve_nothing() {
        assert!(resolve_shards(None, None, None, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_shard_name_for_file() {
        assert_eq!(
            shard_name_for_file(std::path::Path::new("/tmp/2013-03-01-7.json.gz")),
            "2013-03-01-7"
        );
    }
}
