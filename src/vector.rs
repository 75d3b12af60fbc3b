//! Behavior-vector construction.
//!
//! A user's accumulated statistics are summarized as a fixed-dimension
//! numeric vector:
//!
//! ```text
//! [ 1/(total+1) | 7 weekday fractions | event-type fractions |
//!   1/(contributions+1) 1/(connections+1) 1/(repos+1) 1/(languages+1) |
//!   language fractions | unknown-language overflow ]
//! ```
//!
//! Event-type and language slots use fixed vocabularies bundled with the
//! crate; a ranked language outside the vocabulary lands in the single
//! overflow slot. Users with no recorded activity get no vector at all
//! ("insufficient data") — the total is never divided by zero.

use anyhow::Result;
use std::sync::OnceLock;

use crate::store::StatsStore;

const WEEKDAYS: usize = 7;
const INVERSE_COUNTS: usize = 4;

/// Fixed event-type vocabulary.
pub fn event_types() -> &'static [&'static str] {
    static TYPES: OnceLock<Vec<&'static str>> = OnceLock::new();
    TYPES.get_or_init(|| vocabulary(include_str!("../static/evttypes.txt")))
}

/// Fixed language vocabulary.
pub fn languages() -> &'static [&'static str] {
    static LANGS: OnceLock<Vec<&'static str>> = OnceLock::new();
    LANGS.get_or_init(|| vocabulary(include_str!("../static/languages.txt")))
}

fn vocabulary(raw: &'static str) -> Vec<&'static str> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Total vector dimension.
pub fn dimension() -> usize {
    1 + WEEKDAYS + event_types().len() + INVERSE_COUNTS + languages().len() + 1
}

/// Raw statistics backing one user's vector.
#[derive(Debug, Clone)]
pub struct VectorInputs {
    pub total: i64,
    pub weekdays: Vec<i64>,
    pub events: Vec<(String, i64)>,
    pub contributions: i64,
    pub connections: i64,
    pub repos: i64,
    pub language_count: i64,
    pub languages: Vec<(String, i64)>,
}

/// Fetch a user's statistics and build their behavior vector.
///
/// Returns `Ok(None)` when the user has no recorded activity.
pub async fn build_user_vector(store: &StatsStore, username: &str) -> Result<Option<Vec<f32>>> {
    let key = username.to_lowercase();

    let total = store.ranking_score("user", &key).await?.unwrap_or(0);
    if total <= 0 {
        return Ok(None);
    }

    let inputs = VectorInputs {
        total,
        weekdays: store
            .histogram(&format!("user:{}:day", key), WEEKDAYS)
            .await?,
        events: store
            .ranking_top(&format!("user:{}:event", key), 0)
            .await?,
        contributions: store
            .ranking_card(&format!("user:{}:contribution", key))
            .await?,
        connections: store
            .ranking_card(&format!("user:{}:connection", key))
            .await?,
        repos: store.ranking_card(&format!("user:{}:repo", key)).await?,
        language_count: store.ranking_card(&format!("user:{}:lang", key)).await?,
        languages: store.ranking_top(&format!("user:{}:lang", key), 0).await?,
    };

    Ok(Some(assemble(&inputs)))
}

/// Lay the statistics out into the fixed vector shape.
pub fn assemble(inputs: &VectorInputs) -> Vec<f32> {
    let mut points = vec![0f32; dimension()];
    let total = inputs.total as f32;

    points[0] = 1.0 / (total + 1.0);

    for (slot, count) in inputs.weekdays.iter().take(WEEKDAYS).enumerate() {
        points[1 + slot] = *count as f32 / total;
    }

    let mut n = 1 + WEEKDAYS;
    for (evttype, count) in &inputs.events {
        if let Some(idx) = event_types().iter().position(|t| t == evttype) {
            points[n + idx] = *count as f32 / total;
        }
    }

    n += event_types().len();
    points[n] = 1.0 / (inputs.contributions as f32 + 1.0);
    points[n + 1] = 1.0 / (inputs.connections as f32 + 1.0);
    points[n + 2] = 1.0 / (inputs.repos as f32 + 1.0);
    points[n + 3] = 1.0 / (inputs.language_count as f32 + 1.0);

    n += INVERSE_COUNTS;
    let overflow = points.len() - 1;
    for (language, count) in &inputs.languages {
        match languages().iter().position(|l| l == language) {
            Some(idx) => points[n + idx] = *count as f32 / total,
            None => points[overflow] = *count as f32 / total,
        }
    }

    points
}
