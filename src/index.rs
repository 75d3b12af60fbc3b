//! Similarity-index build, swap, and query.
//!
//! The builder samples the most active users (skipping a configurable number
//! of top hubs), assembles their behavior vectors into a matrix, constructs
//! an HNSW index over it, and publishes three files under the index
//! directory:
//!
//! - `similarity.hnsw.graph` / `similarity.hnsw.data` — the ANN index dump
//! - `points.json` — the vector matrix and the matching username list
//!
//! Everything is written under temporary names first and moved into place
//! with filesystem renames, so a reader always sees either the previous
//! snapshot or the new one, never a mix, and a failed build leaves the
//! published files untouched.

use anndists::dist::DistL2;
use anyhow::{anyhow, bail, Context, Result};
use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{Config, IndexConfig};
use crate::db;
use crate::store::StatsStore;
use crate::vector;

const INDEX_BASENAME: &str = "similarity";
const TMP_BASENAME: &str = "similarity.tmp";
const POINTS_FILE: &str = "points.json";

/// The (matrix, username-list) side file, published next to the HNSW dump.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub dim: usize,
    pub names: Vec<String>,
    pub points: Vec<Vec<f32>>,
}

/// One query result.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub username: String,
    pub distance: f32,
}

/// Rebuild the similarity index from the current statistics and atomically
/// replace the published snapshot.
pub async fn run_build_index(config: &Config) -> Result<()> {
    let store = StatsStore::new(db::connect_stats(config).await?);
    let idx = &config.index;

    let usernames = store
        .ranking_range("user", idx.skip_top as i64, idx.population as i64)
        .await?;
    if usernames.is_empty() {
        store.close().await;
        bail!(
            "no users to index — ingest some shards first (skip_top = {})",
            idx.skip_top
        );
    }

    let mut names = Vec::with_capacity(usernames.len());
    let mut points = Vec::with_capacity(usernames.len());
    let mut skipped = 0usize;
    for username in &usernames {
        match vector::build_user_vector(&store, username).await? {
            Some(vector) => {
                names.push(username.clone());
                points.push(vector);
            }
            None => skipped += 1,
        }
    }
    store.close().await;

    if points.is_empty() {
        bail!("every sampled user had insufficient data");
    }

    let snapshot = Snapshot {
        dim: vector::dimension(),
        names,
        points,
    };
    let indexed = publish(&idx.dir, &snapshot, idx)?;

    println!("build-index");
    println!("  population window: {} + {}", idx.skip_top, idx.population);
    println!("  users indexed: {}", indexed);
    println!("  users skipped (insufficient data): {}", skipped);
    println!("  vector dimension: {}", snapshot.dim);
    println!("  published to: {}", idx.dir.display());
    println!("ok");

    Ok(())
}

/// Build the HNSW index for a snapshot and swap both artifacts into place.
/// Returns the number of indexed users.
pub fn publish(dir: &Path, snapshot: &Snapshot, idx: &IndexConfig) -> Result<usize> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create index dir {}", dir.display()))?;

    let hnsw = build_hnsw(&snapshot.points, idx);

    // Dump to temporary names in the same directory, then rename. The old
    // snapshot stays queryable until the renames below.
    for stale in [
        format!("{}.hnsw.graph", TMP_BASENAME),
        format!("{}.hnsw.data", TMP_BASENAME),
    ] {
        let _ = std::fs::remove_file(dir.join(stale));
    }
    hnsw.file_dump(dir, TMP_BASENAME)
        .map_err(|e| anyhow!("failed to dump index: {}", e))?;

    let tmp_points = dir.join(format!("{}.tmp", POINTS_FILE));
    let payload = serde_json::to_vec(snapshot)?;
    std::fs::write(&tmp_points, payload)
        .with_context(|| format!("failed to write {}", tmp_points.display()))?;

    for suffix in ["hnsw.graph", "hnsw.data"] {
        std::fs::rename(
            dir.join(format!("{}.{}", TMP_BASENAME, suffix)),
            dir.join(format!("{}.{}", INDEX_BASENAME, suffix)),
        )
        .with_context(|| format!("failed to publish {}", suffix))?;
    }
    std::fs::rename(&tmp_points, dir.join(POINTS_FILE)).context("failed to publish points")?;

    Ok(snapshot.names.len())
}

fn build_hnsw(points: &[Vec<f32>], idx: &IndexConfig) -> Hnsw<'static, f32, DistL2> {
    // hnsw_rs only dumps an index whose max layer equals its internal
    // NB_LAYER_MAX (16); `file_dump` rejects any other value. A persisted
    // index must therefore be built with exactly 16 layers.
    let nb_layer = 16;
    let hnsw = Hnsw::<f32, DistL2>::new(
        idx.max_connections,
        points.len(),
        nb_layer,
        idx.ef_construction,
        DistL2 {},
    );
    for (i, point) in points.iter().enumerate() {
        hnsw.insert((point, i));
    }
    hnsw
}

/// Load the published side file, or report that no index exists yet.
pub fn load_snapshot(dir: &Path) -> Result<Snapshot> {
    let points_path = dir.join(POINTS_FILE);
    let graph_path = dir.join(format!("{}.hnsw.graph", INDEX_BASENAME));
    if !points_path.exists() || !graph_path.exists() {
        bail!("similarity index not ready — run `octo build-index` first");
    }

    let raw = std::fs::read(&points_path)
        .with_context(|| format!("failed to read {}", points_path.display()))?;
    let snapshot: Snapshot = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", points_path.display()))?;
    Ok(snapshot)
}

/// Query the published index for the `k` nearest neighbors of `query`,
/// excluding `username` itself wherever it appears.
pub fn query_neighbors(
    dir: &Path,
    snapshot: &Snapshot,
    username: &str,
    query: &[f32],
    k: usize,
    ef_search: usize,
) -> Result<Vec<Neighbor>> {
    if query.len() != snapshot.dim {
        bail!(
            "query vector has dimension {}, index expects {}",
            query.len(),
            snapshot.dim
        );
    }

    let mut reloader = HnswIo::new(dir, INDEX_BASENAME);
    let hnsw: Hnsw<f32, DistL2> = reloader
        .load_hnsw()
        .map_err(|e| anyhow!("failed to load index: {}", e))?;

    // K+1 so the query user can be dropped if they were sampled.
    let knbn = k + 1;
    let ef = ef_search.max(knbn);
    let found = hnsw.search(query, knbn, ef);

    let key = username.to_lowercase();
    let mut neighbors: Vec<Neighbor> = found
        .into_iter()
        .filter_map(|n| {
            snapshot.names.get(n.d_id).map(|name| Neighbor {
                username: name.clone(),
                distance: n.distance,
            })
        })
        .filter(|n| n.username.to_lowercase() != key)
        .collect();

    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    neighbors.truncate(k);
    Ok(neighbors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_index_config() -> IndexConfig {
        IndexConfig::default()
    }

    fn snapshot() -> Snapshot {
        // Four tight points near the origin and one far outlier.
        let dim = vector::dimension();
        let mut points = Vec::new();
        for i in 0..4 {
            let mut p = vec![0f32; dim];
            p[0] = 0.01 * i as f32;
            points.push(p);
        }
        let mut outlier = vec![0f32; dim];
        outlier[0] = 100.0;
        points.push(outlier);

        Snapshot {
            dim,
            names: vec![
                "alice".into(),
                "bob".into(),
                "carol".into(),
                "dave".into(),
                "erin".into(),
            ],
            points,
        }
    }

    #[test]
    fn test_publish_and_query_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let snap = snapshot();
        let indexed = publish(tmp.path(), &snap, &test_index_config()).unwrap();
        assert_eq!(indexed, 5);

        let loaded = load_snapshot(tmp.path()).unwrap();
        assert_eq!(loaded.names, snap.names);

        let query = &snap.points[0];
        let neighbors =
            query_neighbors(tmp.path(), &loaded, "alice", query, 3, 64).unwrap();

        assert!(neighbors.len() <= 3);
        assert!(neighbors.iter().all(|n| n.username != "alice"));
        for pair in neighbors.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        // The outlier must not beat the tight cluster.
        assert_ne!(neighbors[0].username, "erin");
    }

    #[test]
    fn test_missing_snapshot_reports_not_ready() {
        let tmp = TempDir::new().unwrap();
        let err = load_snapshot(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }

    #[test]
    fn test_rebuild_replaces_snapshot() {
        let tmp = TempDir::new().unwrap();
        let mut snap = snapshot();
        publish(tmp.path(), &snap, &test_index_config()).unwrap();

        snap.names.pop();
        snap.points.pop();
        publish(tmp.path(), &snap, &test_index_config()).unwrap();

        let loaded = load_snapshot(tmp.path()).unwrap();
        assert_eq!(loaded.names.len(), 4);
    }
}
