//! # Octoscope CLI (`octo`)
//!
//! The `octo` binary drives the ingestion-aggregation-similarity pipeline.
//!
//! ## Usage
//!
//! ```bash
//! octo --config ./config/octo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `octo init` | Create both SQLite databases and run schema migrations |
//! | `octo ingest` | Download and process archive shards |
//! | `octo stats` | Global or per-user activity summary |
//! | `octo build-index` | Rebuild and publish the similarity index |
//! | `octo neighbors <user>` | Find behaviorally similar users |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the databases
//! octo init --config ./config/octo.toml
//!
//! # Process one full day of shards
//! octo ingest --date 2013-03-01
//!
//! # Process two specific hours across a date range
//! octo ingest --since 2013-03-01 --until 2013-03-07 --hour 9 --hour 10
//!
//! # Process previously downloaded shard files
//! octo ingest --file ./data/2013-03-01-7.json.gz
//!
//! # Rebuild the similarity index, then query it
//! octo build-index
//! octo neighbors defunkt --count 10
//! ```

mod archive;
mod config;
mod db;
mod entities;
mod index;
mod ingest;
mod lexicon;
mod migrate;
mod models;
mod neighbors;
mod parse;
mod stats;
mod store;
mod vector;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Octoscope CLI — GitHub Archive ingestion, activity statistics, and
/// behavior-similarity toolkit.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with `[db]`, `[stats]`, `[archive]`, `[ingest]`, `[index]`, and
/// `[lexicon]` sections.
#[derive(Parser)]
#[command(
    name = "octo",
    about = "Octoscope — GitHub Archive ingestion, statistics, and behavior similarity",
    version,
    long_about = "Octoscope downloads date/hour-sharded GitHub Archive event batches, normalizes \
    users and repositories into a relational entity store, accumulates activity statistics, and \
    maintains an approximate-nearest-neighbor index over per-user behavior vectors."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/octo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas.
    ///
    /// Creates the entity store (users, repos, events) and the statistics
    /// store (counters, rankings, histograms, shard ledger). Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Download and process archive shards.
    ///
    /// Fetches the requested date/hour shards concurrently, parses each one,
    /// upserts the entities it mentions, and applies its statistics. Shards
    /// recorded in the ledger are skipped unless `--force` is given; a forced
    /// replay leaves entities unchanged but doubles the statistics counters
    /// the shard touches.
    Ingest {
        /// Process a single day (YYYY-MM-DD).
        #[arg(long, conflicts_with_all = ["since", "until"])]
        date: Option<String>,

        /// First day of a date range (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Last day of a date range (YYYY-MM-DD); defaults to --since.
        #[arg(long)]
        until: Option<String>,

        /// Restrict to specific hours (0-23); repeatable. Default: all 24.
        #[arg(long = "hour")]
        hours: Vec<u32>,

        /// Process a local shard file instead of downloading; repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Reprocess shards already recorded in the ledger.
        #[arg(long)]
        force: bool,
    },

    /// Print activity statistics.
    ///
    /// Without `--user`, prints global totals and rankings. With `--user`,
    /// prints that user's totals, weekday/hour schedule (hour histogram
    /// rotated into local time when a timezone is known), and rankings.
    Stats {
        /// Report on a single user instead of globally.
        #[arg(long)]
        user: Option<String>,
    },

    /// Rebuild the similarity index and atomically publish it.
    ///
    /// Samples the most active users (skipping the configured number of top
    /// hubs), builds their behavior vectors, constructs the ANN index, and
    /// replaces the published snapshot. Queries keep working against the old
    /// snapshot until the swap completes.
    BuildIndex,

    /// Find users with statistically similar behavior.
    ///
    /// Builds the user's behavior vector from current statistics and queries
    /// the published index. Fails with "not ready" before the first
    /// `build-index`, and with "insufficient data" for users without any
    /// recorded activity.
    Neighbors {
        /// GitHub username to look up.
        username: String,

        /// Number of neighbors to return (default from config).
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Ingest {
            date,
            since,
            until,
            hours,
            files,
            force,
        } => {
            let shards = ingest::resolve_shards(
                date.as_deref(),
                since.as_deref(),
                until.as_deref(),
                &hours,
            )?;
            ingest::run_ingest(&cfg, shards, files, force).await?;
        }
        Commands::Stats { user } => {
            stats::run_stats(&cfg, user).await?;
        }
        Commands::BuildIndex => {
            index::run_build_index(&cfg).await?;
        }
        Commands::Neighbors { username, count } => {
            neighbors::run_neighbors(&cfg, &username, count).await?;
        }
    }

    Ok(())
}
