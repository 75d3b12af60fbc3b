//! Core data models used throughout Octoscope.
//!
//! These types represent the shards, partial entity records, and per-event
//! observations that flow through the ingestion pipeline.

use chrono::{DateTime, Utc};

/// Identifies one GitHub Archive shard: a single hour of a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl ShardId {
    /// Canonical shard name, e.g. `2013-03-01-12`. Used as the ledger key
    /// and as the local file stem.
    pub fn name(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}-{}",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Download URL for this shard under the configured archive base.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}.json.gz", base_url.trim_end_matches('/'), self.name())
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Accumulated partial user record for one shard.
///
/// Only `id` and `login` are guaranteed by the upstream feed; every other
/// field is merged in as later observations carry it.
#[derive(Debug, Clone)]
pub struct PartialUser {
    pub id: i64,
    pub login: String,
    pub user_type: Option<String>,
    pub name: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
}

impl PartialUser {
    /// Coalesce `incoming` into `self`: a present incoming field overwrites,
    /// an absent one preserves what was already accumulated.
    pub fn merge(&mut self, incoming: PartialUser) {
        self.login = incoming.login;
        if incoming.user_type.is_some() {
            self.user_type = incoming.user_type;
        }
        if incoming.name.is_some() {
            self.name = incoming.name;
        }
        if incoming.location.is_some() {
            self.location = incoming.location;
        }
        if incoming.avatar_url.is_some() {
            self.avatar_url = incoming.avatar_url;
        }
    }
}

/// Accumulated partial repository record for one shard.
#[derive(Debug, Clone)]
pub struct PartialRepo {
    pub id: i64,
    pub name: String,
    pub fullname: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub fork: Option<bool>,
    pub star_count: Option<i64>,
    pub watcher_count: Option<i64>,
    pub fork_count: Option<i64>,
    pub issues_count: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub owner_id: Option<i64>,
}

impl PartialRepo {
    pub fn merge(&mut self, incoming: PartialRepo) {
        self.name = incoming.name;
        self.fullname = incoming.fullname;
        if incoming.description.is_some() {
            self.description = incoming.description;
        }
        if incoming.language.is_some() {
            self.language = incoming.language;
        }
        if incoming.fork.is_some() {
            self.fork = incoming.fork;
        }
        if incoming.star_count.is_some() {
            self.star_count = incoming.star_count;
        }
        if incoming.watcher_count.is_some() {
            self.watcher_count = incoming.watcher_count;
        }
        if incoming.fork_count.is_some() {
            self.fork_count = incoming.fork_count;
        }
        if incoming.issues_count.is_some() {
            self.issues_count = incoming.issues_count;
        }
        if incoming.last_updated.is_some() {
            self.last_updated = incoming.last_updated;
        }
        if incoming.owner_id.is_some() {
            self.owner_id = incoming.owner_id;
        }
    }
}

/// Everything the statistics updater needs to know about one event, extracted
/// during parsing so the updater never touches raw JSON.
#[derive(Debug, Clone)]
pub struct EventObservation {
    /// Upstream event id, when the feed carries one.
    pub event_id: Option<String>,
    pub evttype: String,
    pub created_at: DateTime<Utc>,
    /// Monday = 0 .. Sunday = 6.
    pub weekday: u32,
    /// UTC hour, 0..24.
    pub hour: u32,
    /// Increment weight: 1, or the batched push size for `PushEvent`s.
    pub weight: i64,
    pub actor_id: i64,
    /// Lowercased actor login — the statistics key.
    pub actor_key: String,
    pub repo_id: i64,
    /// Fully-qualified `owner/name`.
    pub repo_fullname: String,
    /// Lowercased owner login, when the owner is known.
    pub owner_key: Option<String>,
    /// Whether the repository belongs to an organization rather than a person.
    pub org_owned: bool,
    pub language: Option<String>,
    /// Commit messages from push payloads, for the lexicon side channel.
    pub commit_messages: Vec<String>,
}

impl EventObservation {
    /// Event types that count as contributions to a repository.
    pub fn is_contribution(&self) -> bool {
        matches!(
            self.evttype.as_str(),
            "IssuesEvent" | "PullRequestEvent" | "PushEvent"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_name_and_url() {
        let shard = ShardId {
            year: 2013,
            month: 3,
            day: 1,
            hour: 7,
        };
        assert_eq!(shard.name(), "2013-03-01-7");
        assert_eq!(
            shard.url("https://data.gharchive.org/"),
            "https://data.gharchive.org/2013-03-01-7.json.gz"
        );
    }

    #[test]
    fn test_user_merge_preserves_on_none() {
        let mut user = PartialUser {
            id: 1,
            login: "alice".into(),
            user_type: Some("User".into()),
            name: Some("Alice".into()),
            location: None,
            avatar_url: None,
        };
        user.merge(PartialUser {
            id: 1,
            login: "alice".into(),
            user_type: None,
            name: None,
            location: Some("Berlin".into()),
            avatar_url: None,
        });
        assert_eq!(user.name.as_deref(), Some("Alice"));
        assert_eq!(user.location.as_deref(), Some("Berlin"));
        assert_eq!(user.user_type.as_deref(), Some("User"));
    }

    #[test]
    fn test_user_merge_last_non_null_wins() {
        let mut user = PartialUser {
            id: 1,
            login: "alice".into(),
            user_type: None,
            name: Some("Alice".into()),
            location: None,
            avatar_url: None,
        };
        user.merge(PartialUser {
            id: 1,
            login: "alice".into(),
            user_type: None,
            name: Some("Alice B.".into()),
            location: None,
            avatar_url: None,
        });
        assert_eq!(user.name.as_deref(), Some("Alice B."));
    }
}
