//! Similarity queries.
//!
//! `octo neighbors <username>` builds the user's behavior vector from the
//! current statistics, loads the published index snapshot, and prints up to K
//! neighbors ordered by ascending distance. The query user is dropped from
//! the results whether or not they were part of the sampled population.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::index;
use crate::store::StatsStore;
use crate::vector;

pub async fn run_neighbors(config: &Config, username: &str, count: Option<usize>) -> Result<()> {
    let k = count.unwrap_or(config.index.neighbors);

    let store = StatsStore::new(db::connect_stats(config).await?);
    let built = vector::build_user_vector(&store, username).await?;
    store.close().await;

    let Some(query) = built else {
        bail!("insufficient data for user '{}'", username);
    };

    let snapshot = index::load_snapshot(&config.index.dir)?;
    let neighbors = index::query_neighbors(
        &config.index.dir,
        &snapshot,
        username,
        &query,
        k,
        config.index.ef_search,
    )?;

    if neighbors.is_empty() {
        println!("No neighbors found for {}.", username);
        return Ok(());
    }

    println!("neighbors of {}", username);
    for (i, neighbor) in neighbors.iter().enumerate() {
        println!(
            "  {}. {} (distance {:.4})",
            i + 1,
            neighbor.username,
            neighbor.distance
        );
    }

    Ok(())
}
