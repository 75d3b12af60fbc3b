use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub stats: StatsConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub lexicon: LexiconConfig,
}

/// Entity store (users, repos, events).
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Counter/histogram store and shard ledger.
#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Maximum number of shard downloads in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Total per-request timeout. Shards run to ~100 MB compressed on busy
    /// hours, so this is generous by default.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            concurrency: default_concurrency(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://data.gharchive.org".to_string()
}
fn default_concurrency() -> usize {
    6
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Number of shards parsed and flushed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Keep one row per event id in the entity store.
    #[serde(default)]
    pub persist_events: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            persist_events: false,
        }
    }
}

fn default_parallelism() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the published snapshot files.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Most-active users skipped before sampling, to avoid hub distortion.
    #[serde(default = "default_skip_top")]
    pub skip_top: usize,
    /// Size of the sampled population below the skipped hubs.
    #[serde(default = "default_population")]
    pub population: usize,
    /// Default neighbor count for queries.
    #[serde(default = "default_neighbors")]
    pub neighbors: usize,
    /// HNSW graph degree (`M`).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            skip_top: default_skip_top(),
            population: default_population(),
            neighbors: default_neighbors(),
            max_connections: default_max_connections(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_skip_top() -> usize {
    500
}
fn default_population() -> usize {
    50000
}
fn default_neighbors() -> usize {
    5
}
fn default_max_connections() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct LexiconConfig {
    #[serde(default = "default_lexicon_enabled")]
    pub enabled: bool,
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            enabled: default_lexicon_enabled(),
        }
    }
}

fn default_lexicon_enabled() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.archive.concurrency == 0 {
        anyhow::bail!("archive.concurrency must be > 0");
    }
    if config.ingest.parallelism == 0 {
        anyhow::bail!("ingest.parallelism must be > 0");
    }
    if config.index.population == 0 {
        anyhow::bail!("index.population must be > 0");
    }
    if config.index.neighbors == 0 {
        anyhow::bail!("index.neighbors must be >= 1");
    }
    if config.index.max_connections < 4 {
        anyhow::bail!("index.max_connections must be >= 4");
    }
    if config.db.path == config.stats.path {
        anyhow::bail!("db.path and stats.path must point at different files");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/entities.sqlite"

            [stats]
            path = "data/stats.sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.base_url, "https://data.gharchive.org");
        assert_eq!(config.archive.concurrency, 6);
        assert_eq!(config.index.skip_top, 500);
        assert_eq!(config.index.population, 50000);
        assert_eq!(config.index.neighbors, 5);
        assert!(config.lexicon.enabled);
        assert!(!config.ingest.persist_events);
    }
}
