//! GitHub Archive shard downloads.
//!
//! Fetches one or more date/hour shards concurrently from the templated
//! archive URL. Downloads are bounded by a configurable concurrency limit and
//! carry explicit connect and total timeouts, so no request blocks
//! indefinitely.
//!
//! Failures are never dropped: every requested shard ends up either in
//! [`FetchOutcome::fetched`] or in [`FetchOutcome::failures`] with its cause,
//! and the caller decides what to do with a partial result.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ArchiveConfig;
use crate::models::ShardId;

/// Result of a multi-shard download: the shards that arrived, and the ones
/// that did not with their failure causes.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub fetched: Vec<(ShardId, Vec<u8>)>,
    pub failures: Vec<(ShardId, String)>,
}

/// Download a set of shards concurrently.
///
/// Network errors, timeouts, and non-2xx statuses are recorded per shard;
/// the call itself only fails if the HTTP client cannot be constructed.
pub async fn fetch_shards(config: &ArchiveConfig, shards: &[ShardId]) -> Result<FetchOutcome> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut tasks = JoinSet::new();

    for &shard in shards {
        let client = client.clone();
        let semaphore = semaphore.clone();
        let url = shard.url(&config.base_url);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("download semaphore closed");
            (shard, download_shard(&client, &url).await)
        });
    }

    let mut outcome = FetchOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        let (shard, result) = joined?;
        match result {
            Ok(bytes) => outcome.fetched.push((shard, bytes)),
            Err(reason) => outcome.failures.push((shard, reason)),
        }
    }

    // Deterministic order regardless of arrival order.
    outcome.fetched.sort_by_key(|(shard, _)| shard.name());
    outcome.failures.sort_by_key(|(shard, _)| shard.name());

    Ok(outcome)
}

async fn download_shard(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, String> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {}", e))?;

    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| format!("body read failed: {}", e))?;

    Ok(bytes.to_vec())
}

/// Expand a day into its 24 hourly shards.
pub fn day_shards(year: i32, month: u32, day: u32) -> Vec<ShardId> {
    (0..24)
        .map(|hour| ShardId {
            year,
            month,
            day,
            hour,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_shards_cover_all_hours() {
        let shards = day_shards(2013, 3, 1);
        assert_eq!(shards.len(), 24);
        assert_eq!(shards[0].name(), "2013-03-01-0");
        assert_eq!(shards[23].name(), "2013-03-01-23");
    }
}
