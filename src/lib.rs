//! # Octoscope
//!
//! A GitHub Archive ingestion, activity-statistics, and behavior-similarity
//! toolkit.
//!
//! Octoscope downloads date/hour-sharded event batches from the GitHub
//! Archive, normalizes the users and repositories they mention into a
//! relational entity store, accumulates online activity statistics
//! (histograms, rankings, a social co-occurrence graph), and builds an
//! approximate-nearest-neighbor index over per-user behavior vectors so that
//! users with statistically similar activity can be found quickly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Fetcher  │──▶│ Parser +      │──▶│ Entity store │
//! │ (shards) │   │ Normalizer    │   │ (SQLite)     │
//! └──────────┘   └──────┬────────┘   └──────────────┘
//!                       │
//!                       ▼
//!                ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//!                │ Stats store  │──▶│ Vector       │──▶│ ANN index │
//!                │ (SQLite)     │   │ builder      │   │ snapshot  │
//!                └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                                           ▼
//!                                                   `octo neighbors`
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! octo init                         # create both databases
//! octo ingest --date 2013-03-01    # download + process one day of shards
//! octo stats --user defunkt         # per-user activity summary
//! octo build-index                  # (re)build the similarity index
//! octo neighbors defunkt            # who behaves like defunkt?
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`archive`] | Concurrent shard downloads |
//! | [`parse`] | Event parsing and entity normalization |
//! | [`entities`] | Coalescing entity-store upserts |
//! | [`store`] | Counter/histogram store and shard ledger |
//! | [`lexicon`] | Commit-message lexicon scanning |
//! | [`vector`] | Behavior-vector construction |
//! | [`index`] | ANN index build, swap, and snapshot loading |
//! | [`neighbors`] | Similarity queries |
//! | [`ingest`] | Ingestion orchestration |
//! | [`stats`] | Activity reporting |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod config;
pub mod db;
pub mod entities;
pub mod index;
pub mod ingest;
pub mod lexicon;
pub mod migrate;
pub mod models;
pub mod neighbors;
pub mod parse;
pub mod stats;
pub mod store;
pub mod vector;
