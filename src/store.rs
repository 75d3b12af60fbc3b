//! The counter/histogram store.
//!
//! Aggregated statistics live in their own SQLite database as three key
//! spaces: plain counters, sorted rankings (key → member → score), and
//! fixed-length integer histograms (key → slot → count). Keys are namespaced
//! strings in the style `user:{login}:event` — see [`StatsBatch::record`] for
//! the full key inventory.
//!
//! Increments for one shard are accumulated in an in-memory [`StatsBatch`]
//! and flushed as a single transaction of additive upserts, together with the
//! shard's ledger row. Counters are monotonically non-decreasing and are not
//! idempotent under replay; the ledger is what makes reprocessing a shard
//! safe (see `octo ingest --force` for the deliberate bypass).

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::lexicon::Lexicon;
use crate::models::EventObservation;

/// In-memory accumulation of one shard's statistics increments.
#[derive(Debug, Default)]
pub struct StatsBatch {
    counters: HashMap<String, i64>,
    rankings: HashMap<(String, String), i64>,
    histograms: HashMap<(String, u32), i64>,
}

impl StatsBatch {
    fn incr(&mut self, key: impl Into<String>, by: i64) {
        *self.counters.entry(key.into()).or_default() += by;
    }

    fn zincr(&mut self, key: impl Into<String>, member: impl Into<String>, by: i64) {
        *self
            .rankings
            .entry((key.into(), member.into()))
            .or_default() += by;
    }

    fn hincr(&mut self, key: impl Into<String>, slot: u32, by: i64) {
        *self.histograms.entry((key.into(), slot)).or_default() += by;
    }

    /// Apply one event observation. This is the statistics updater: every
    /// counter, ranking, and histogram touched by an event is listed here.
    pub fn record(&mut self, obs: &EventObservation, lexicon: Option<&Lexicon>) {
        let w = obs.weight;
        let key = &obs.actor_key;
        let rkey = &obs.repo_fullname;
        let t = &obs.evttype;

        // Global totals and schedules.
        self.incr("total", w);
        self.hincr("day", obs.weekday, w);
        self.hincr("hour", obs.hour, w);
        self.zincr("user", key, w);
        self.zincr("repo", rkey, w);
        self.zincr("event", t, w);
        self.hincr(format!("event:{}:day", t), obs.weekday, w);
        self.hincr(format!("event:{}:hour", t), obs.hour, w);

        // Per-user schedules and event-type ranking.
        self.hincr(format!("user:{}:day", key), obs.weekday, w);
        self.hincr(format!("user:{}:hour", key), obs.hour, w);
        self.zincr(format!("user:{}:event", key), t, w);
        self.hincr(format!("user:{}:event:{}:day", key, t), obs.weekday, w);
        self.hincr(format!("user:{}:event:{}:hour", key, t), obs.hour, w);

        // Per-repo equivalents.
        self.hincr(format!("repo:{}:day", rkey), obs.weekday, w);
        self.hincr(format!("repo:{}:hour", rkey), obs.hour, w);
        self.zincr(format!("repo:{}:event", rkey), t, w);

        match obs.owner_key.as_deref() {
            // The user working on their own project.
            Some(okey) if okey == key => {
                self.zincr(format!("user:{}:repo", key), rkey, w);
            }
            // Activity against someone else's project.
            Some(okey) => {
                if obs.is_contribution() {
                    self.zincr("contribution", rkey, w);
                    self.zincr(format!("user:{}:contribution", key), rkey, w);
                }
                if !obs.org_owned {
                    // How connected are these two users?
                    self.zincr(format!("user:{}:connection", key), okey, w);
                    self.zincr(format!("user:{}:connection", okey), key, w);
                    self.incr("connection", w);
                    self.zincr("connection:user", key, w);
                    self.zincr("connection:user", okey, w);
                }
            }
            None => {}
        }

        // Lexicon side channel over push commit messages.
        if let Some(lexicon) = lexicon {
            let mut matched = 0i64;
            for message in &obs.commit_messages {
                for word in lexicon.matches(message) {
                    matched += 1;
                    self.zincr("curse", &word, 1);
                    self.zincr(format!("user:{}:curse", key), &word, 1);
                    self.zincr("curse:user", key, 1);
                    if let Some(lang) = &obs.language {
                        self.zincr(format!("lang:{}:curse", lang), &word, 1);
                    }
                }
            }
            if matched > 0 {
                if let Some(lang) = &obs.language {
                    self.zincr("curse:lang", lang, matched);
                }
            }
        }

        if let Some(lang) = &obs.language {
            self.zincr("lang", lang, w);
            if t == "PushEvent" {
                self.zincr("pushes:lang", lang, w);
            }
            if obs.is_contribution() {
                self.zincr(format!("user:{}:lang", key), lang, w);
                self.zincr(format!("lang:{}:user", lang), key, w);
            }
        }
    }
}

/// Handle on the statistics database.
pub struct StatsStore {
    pool: SqlitePool,
}

impl StatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Whether a shard's statistics have already been applied.
    pub async fn is_processed(&self, shard_name: &str) -> Result<bool> {
        let row: Option<String> = sqlx::query_scalar("SELECT name FROM shards WHERE name = ?")
            .bind(shard_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Apply a batch atomically, marking the shard in the ledger in the same
    /// transaction so a crash can never double-count.
    pub async fn flush(
        &self,
        batch: &StatsBatch,
        shard_name: &str,
        event_count: usize,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in &batch.counters {
            sqlx::query(
                r#"
                INSERT INTO counters (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
                "#,
            )
            .bind(key)
            .bind(*value)
            .execute(&mut *tx)
            .await?;
        }

        for ((key, member), score) in &batch.rankings {
            sqlx::query(
                r#"
                INSERT INTO rankings (key, member, score) VALUES (?, ?, ?)
                ON CONFLICT(key, member) DO UPDATE SET score = score + excluded.score
                "#,
            )
            .bind(key)
            .bind(member)
            .bind(*score)
            .execute(&mut *tx)
            .await?;
        }

        for ((key, slot), count) in &batch.histograms {
            sqlx::query(
                r#"
                INSERT INTO histograms (key, slot, count) VALUES (?, ?, ?)
                ON CONFLICT(key, slot) DO UPDATE SET count = count + excluded.count
                "#,
            )
            .bind(key)
            .bind(*slot)
            .bind(*count)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO shards (name, processed_at, events) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                processed_at = excluded.processed_at,
                events = excluded.events
            "#,
        )
        .bind(shard_name)
        .bind(Utc::now().timestamp())
        .bind(event_count as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn counter(&self, key: &str) -> Result<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.unwrap_or(0))
    }

    /// Top members of a ranking, highest score first. `limit = 0` means all.
    pub async fn ranking_top(&self, key: &str, limit: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT member, score FROM rankings
            WHERE key = ?
            ORDER BY score DESC, member ASC
            LIMIT ?
            "#,
        )
        .bind(key)
        .bind(if limit == 0 { i64::MAX } else { limit })
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("member"), row.get("score")))
            .collect())
    }

    /// A window of a ranking ordered by descending score — the population
    /// sampler for the index builder.
    pub async fn ranking_range(&self, key: &str, offset: i64, count: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT member FROM rankings
            WHERE key = ?
            ORDER BY score DESC, member ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(key)
        .bind(count)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("member")).collect())
    }

    /// Number of members in a ranking.
    pub async fn ranking_card(&self, key: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rankings WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn ranking_score(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let score: Option<i64> =
            sqlx::query_scalar("SELECT score FROM rankings WHERE key = ? AND member = ?")
                .bind(key)
                .bind(member)
                .fetch_optional(&self.pool)
                .await?;
        Ok(score)
    }

    /// Number of shards recorded in the ledger.
    pub async fn shard_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shards")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Materialize a fixed-length histogram; missing slots read as zero.
    pub async fn histogram(&self, key: &str, len: usize) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT slot, count FROM histograms WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;

        let mut hist = vec![0i64; len];
        for row in &rows {
            let slot: i64 = row.get("slot");
            let count: i64 = row.get("count");
            if let Some(entry) = hist.get_mut(slot as usize) {
                *entry = count;
            }
        }
        Ok(hist)
    }
}

/// Cyclic left shift of a histogram, used for timezone correction.
///
/// `roll(roll(x, a), b) == roll(x, a + b)` for any integer shifts.
pub fn roll(x: &[i64], shift: i64) -> Vec<i64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let shift = shift.rem_euclid(n as i64) as usize;
    let mut rolled = Vec::with_capacity(n);
    rolled.extend_from_slice(&x[shift..]);
    rolled.extend_from_slice(&x[..shift]);
    rolled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(actor: &str, owner: Option<&str>, evttype: &str) -> EventObservation {
        EventObservation {
            event_id: None,
            evttype: evttype.to_string(),
            created_at: Utc.with_ymd_and_hms(2013, 3, 4, 10, 0, 0).unwrap(),
            weekday: 0,
            hour: 10,
            weight: 1,
            actor_id: 1,
            actor_key: actor.to_string(),
            repo_id: 10,
            repo_fullname: format!("{}/proj", owner.unwrap_or(actor)),
            owner_key: owner.map(str::to_string).or(Some(actor.to_string())),
            org_owned: false,
            language: Some("Rust".to_string()),
            commit_messages: Vec::new(),
        }
    }

    #[test]
    fn test_roll_composition() {
        let x: Vec<i64> = (0..24).collect();
        for a in [-30i64, -5, 0, 3, 24, 47] {
            for b in [-7i64, 0, 2, 25] {
                assert_eq!(roll(&roll(&x, a), b), roll(&x, a + b), "a={} b={}", a, b);
            }
        }
    }

    #[test]
    fn test_roll_zero_is_identity() {
        let x = vec![1, 2, 3, 4, 5, 6, 7];
        assert_eq!(roll(&x, 0), x);
        assert_eq!(roll(&x, 7), x);
        assert_eq!(roll(&x, -7), x);
    }

    #[test]
    fn test_roll_shifts_left() {
        let x = vec![1, 2, 3, 4];
        assert_eq!(roll(&x, 1), vec![2, 3, 4, 1]);
        assert_eq!(roll(&x, -1), vec![4, 1, 2, 3]);
    }

    #[test]
    fn test_roll_empty() {
        assert_eq!(roll(&[], 5), Vec::<i64>::new());
    }

    #[test]
    fn test_record_own_repo() {
        let mut batch = StatsBatch::default();
        batch.record(&observation("alice", None, "PushEvent"), None);

        assert_eq!(batch.counters["total"], 1);
        assert_eq!(batch.rankings[&("user".to_string(), "alice".to_string())], 1);
        assert_eq!(
            batch.rankings[&("user:alice:repo".to_string(), "alice/proj".to_string())],
            1
        );
        // Own-repo work creates no social connection.
        assert!(batch.counters.get("connection").is_none());
        // Pushes to an own Rust repo still count as contributions to the
        // language rankings.
        assert_eq!(
            batch.rankings[&("user:alice:lang".to_string(), "Rust".to_string())],
            1
        );
    }

    #[test]
    fn test_record_foreign_repo_connects_both_users() {
        let mut batch = StatsBatch::default();
        batch.record(&observation("alice", Some("bob"), "PushEvent"), None);

        assert_eq!(batch.counters["connection"], 1);
        assert_eq!(
            batch.rankings[&("user:alice:connection".to_string(), "bob".to_string())],
            1
        );
        assert_eq!(
            batch.rankings[&("user:bob:connection".to_string(), "alice".to_string())],
            1
        );
        assert_eq!(
            batch.rankings[&("user:alice:contribution".to_string(), "bob/proj".to_string())],
            1
        );
    }

    #[test]
    fn test_record_org_repo_makes_no_connection() {
        let mut batch = StatsBatch::default();
        let mut obs = observation("alice", Some("acme"), "PushEvent");
        obs.org_owned = true;
        batch.record(&obs, None);

        assert!(batch.counters.get("connection").is_none());
        // Still a contribution.
        assert_eq!(
            batch.rankings[&("contribution".to_string(), "acme/proj".to_string())],
            1
        );
    }

    #[test]
    fn test_record_watch_is_not_contribution() {
        let mut batch = StatsBatch::default();
        batch.record(&observation("alice", Some("bob"), "WatchEvent"), None);

        assert!(batch
            .rankings
            .get(&("user:alice:contribution".to_string(), "bob/proj".to_string()))
            .is_none());
        // Watching a person's repo still counts for the social graph.
        assert_eq!(batch.counters["connection"], 1);
    }

    #[test]
    fn test_record_lexicon_counters() {
        let lexicon = Lexicon::from_words(["damn"]).unwrap();
        let mut batch = StatsBatch::default();
        let mut obs = observation("alice", None, "PushEvent");
        obs.commit_messages = vec!["damn flaky test".to_string(), "all green".to_string()];
        batch.record(&obs, Some(&lexicon));

        assert_eq!(batch.rankings[&("curse".to_string(), "damn".to_string())], 1);
        assert_eq!(
            batch.rankings[&("user:alice:curse".to_string(), "damn".to_string())],
            1
        );
        assert_eq!(
            batch.rankings[&("curse:lang".to_string(), "Rust".to_string())],
            1
        );
    }
}
