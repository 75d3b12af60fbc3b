//! Event parsing and entity normalization.
//!
//! Decompresses one shard, parses one JSON event per line, and accumulates a
//! merged partial record per distinct user and repository id observed in the
//! shard. Nested organization, owner, parent, and fork-source records are
//! normalized recursively; a per-event visited-id set bounds the recursion
//! because the upstream data carries no acyclicity guarantee.
//!
//! Malformed lines are logged and skipped — one bad event never fails a
//! shard. Events without a usable actor or repository (anonymous gists, wiki
//! noise) are counted and ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};

use crate::models::{EventObservation, PartialRepo, PartialUser};

/// Everything extracted from one shard: merged partial entities plus the
/// per-event observations for the statistics updater.
#[derive(Debug, Default)]
pub struct ShardBatch {
    pub users: HashMap<i64, PartialUser>,
    pub repos: HashMap<i64, PartialRepo>,
    pub observations: Vec<EventObservation>,
    /// Events successfully processed.
    pub parsed: usize,
    /// Malformed lines skipped.
    pub skipped: usize,
    /// Well-formed events ignored for lack of an actor or repository.
    pub ignored: usize,
}

// ============ Raw wire types ============

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    evttype: String,
    created_at: String,
    actor: Option<RawUser>,
    repo: Option<RawRepo>,
    repository: Option<RawRepo>,
    payload: Option<RawPayload>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: Option<i64>,
    login: Option<String>,
    #[serde(rename = "type")]
    user_type: Option<String>,
    name: Option<String>,
    location: Option<String>,
    avatar_url: Option<String>,
}

/// Repository owner: an embedded user record in the event API shape, or a
/// bare login string in the oldest timeline shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOwner {
    User(Box<RawUser>),
    Login(String),
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    id: Option<i64>,
    name: Option<String>,
    owner: Option<RawOwner>,
    organization: Option<Box<RawUser>>,
    parent: Option<Box<RawRepo>>,
    source: Option<Box<RawRepo>>,
    description: Option<String>,
    language: Option<String>,
    fork: Option<bool>,
    stargazers_count: Option<i64>,
    subscribers_count: Option<i64>,
    forks_count: Option<i64>,
    open_issues_count: Option<i64>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    size: Option<i64>,
    /// Push commits, tuple form: `[sha, author_email, message, author_name]`.
    shas: Option<Vec<serde_json::Value>>,
    /// Push commits, object form.
    commits: Option<Vec<RawCommit>>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    message: Option<String>,
}

// ============ Shard parsing ============

/// Decompress and parse one shard's gzip NDJSON payload.
pub fn parse_shard(shard_name: &str, compressed: &[u8]) -> Result<ShardBatch> {
    let reader = BufReader::new(GzDecoder::new(compressed));
    let mut batch = ShardBatch::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to decompress shard {}", shard_name))?;
        if line.trim().is_empty() {
            continue;
        }

        let event: RawEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                eprintln!(
                    "Warning: skipping line {} of {}: {}",
                    lineno + 1,
                    shard_name,
                    e
                );
                batch.skipped += 1;
                continue;
            }
        };

        match batch.process_event(event) {
            Some(()) => batch.parsed += 1,
            None => batch.ignored += 1,
        }
    }

    Ok(batch)
}

impl ShardBatch {
    /// Normalize one event into the batch. Returns `None` when the event has
    /// no usable actor, repository, or timestamp.
    fn process_event(&mut self, event: RawEvent) -> Option<()> {
        let created_at = parse_datetime(&event.created_at)?;

        // Per-event cycle guards for the nested entity chains.
        let mut seen_users = HashSet::new();
        let mut seen_repos = HashSet::new();

        let actor = event.actor?;
        let (actor_id, actor_login) = self.add_user(&actor, &mut seen_users)?;

        let repo = event.repo.or(event.repository)?;
        let normalized = self.add_repo(&repo, &mut seen_users, &mut seen_repos)?;

        let weight = match event.evttype.as_str() {
            "PushEvent" => event
                .payload
                .as_ref()
                .and_then(|p| p.size)
                .unwrap_or(1)
                .max(1),
            _ => 1,
        };

        let commit_messages = if event.evttype == "PushEvent" {
            event
                .payload
                .as_ref()
                .map(collect_commit_messages)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.observations.push(EventObservation {
            event_id: event.id.map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            evttype: event.evttype,
            created_at,
            weekday: created_at.weekday().num_days_from_monday(),
            hour: created_at.hour(),
            weight,
            actor_id,
            actor_key: actor_login.to_lowercase(),
            repo_id: normalized.id,
            repo_fullname: normalized.fullname,
            owner_key: normalized.owner_login.map(|l| l.to_lowercase()),
            org_owned: normalized.org_owned,
            language: normalized.language,
            commit_messages,
        });

        Some(())
    }

    /// Merge a user record into the batch. Returns its `(id, login)` or
    /// `None` when the record is too thin to identify.
    fn add_user(&mut self, user: &RawUser, seen: &mut HashSet<i64>) -> Option<(i64, String)> {
        let id = user.id?;
        let login = user.login.clone()?;

        if seen.insert(id) {
            let incoming = PartialUser {
                id,
                login: login.clone(),
                user_type: user.user_type.clone(),
                name: user.name.clone(),
                location: user.location.clone(),
                avatar_url: user.avatar_url.clone(),
            };
            match self.users.entry(id) {
                std::collections::hash_map::Entry::Occupied(mut e) => e.get_mut().merge(incoming),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(incoming);
                }
            }
        }

        Some((id, login))
    }

    /// Recursively merge a repository and its nested entities into the batch.
    fn add_repo(
        &mut self,
        repo: &RawRepo,
        seen_users: &mut HashSet<i64>,
        seen_repos: &mut HashSet<i64>,
    ) -> Option<NormalizedRepo> {
        let id = repo.id?;
        let raw_name = repo.name.clone()?;

        let already_seen = !seen_repos.insert(id);

        let mut org_owned = false;
        if let Some(org) = &repo.organization {
            org_owned = true;
            if !already_seen {
                self.add_user(org, seen_users);
            }
        }
        if !already_seen {
            if let Some(parent) = &repo.parent {
                self.add_repo(parent, seen_users, seen_repos);
            }
            if let Some(source) = &repo.source {
                self.add_repo(source, seen_users, seen_repos);
            }
        }

        // Owner resolution: an embedded user record, a bare login, or the
        // qualified-name prefix of the modern `owner/name` shape.
        let (name, fullname, owner_login, owner_id) = match &repo.owner {
            Some(RawOwner::User(owner)) => {
                let resolved = if already_seen {
                    owner.id.zip(owner.login.clone())
                } else {
                    self.add_user(owner, seen_users)
                };
                if owner.user_type.as_deref() == Some("Organization") {
                    org_owned = true;
                }
                match resolved {
                    Some((oid, ologin)) => {
                        let fullname = format!("{}/{}", ologin, raw_name);
                        (raw_name, fullname, Some(ologin), Some(oid))
                    }
                    None => split_qualified(&raw_name),
                }
            }
            Some(RawOwner::Login(login)) if !login.is_empty() => {
                let fullname = format!("{}/{}", login, raw_name);
                (raw_name, fullname, Some(login.clone()), None)
            }
            _ => split_qualified(&raw_name),
        };

        let incoming = PartialRepo {
            id,
            name,
            fullname: fullname.clone(),
            description: repo.description.clone(),
            language: repo.language.clone(),
            fork: repo.fork,
            star_count: repo.stargazers_count,
            watcher_count: repo.subscribers_count,
            fork_count: repo.forks_count,
            issues_count: repo.open_issues_count,
            last_updated: repo.updated_at.as_deref().and_then(parse_datetime),
            owner_id,
        };

        match self.repos.entry(id) {
            std::collections::hash_map::Entry::Occupied(mut e) => e.get_mut().merge(incoming),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(incoming);
            }
        }

        Some(NormalizedRepo {
            id,
            fullname,
            owner_login,
            org_owned,
            language: repo.language.clone(),
        })
    }
}

/// What the statistics updater needs from a normalized top-level repository.
struct NormalizedRepo {
    id: i64,
    fullname: String,
    owner_login: Option<String>,
    org_owned: bool,
    language: Option<String>,
}

/// Derive `(name, fullname, owner_login, owner_id)` from a repo name that may
/// already be qualified as `owner/name`.
fn split_qualified(raw_name: &str) -> (String, String, Option<String>, Option<i64>) {
    match raw_name.split_once('/') {
        Some((owner, _)) => {
            let short = raw_name.rsplit('/').next().unwrap_or(raw_name).to_string();
            (short, raw_name.to_string(), Some(owner.to_string()), None)
        }
        None => (raw_name.to_string(), raw_name.to_string(), None, None),
    }
}

fn collect_commit_messages(payload: &RawPayload) -> Vec<String> {
    let mut messages = Vec::new();
    if let Some(shas) = &payload.shas {
        for sha in shas {
            if let Some(message) = sha.get(2).and_then(|m| m.as_str()) {
                messages.push(message.to_string());
            }
        }
    }
    if let Some(commits) = &payload.commits {
        for commit in commits {
            if let Some(message) = &commit.message {
                messages.push(message.clone());
            }
        }
    }
    messages
}

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Oldest timeline shape: "2011/03/01 10:22:44 -0800".
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip_lines(lines: &[&str]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        encoder.finish().unwrap()
    }

    fn push_event(login: &str, user_id: i64, repo: &str, repo_id: i64, extra: &str) -> String {
        format!(
            r#"{{"id":"{}","type":"PushEvent","created_at":"2013-03-04T10:00:00Z",
              "actor":{{"id":{},"login":"{}"}},
              "repo":{{"id":{},"name":"{}"{}}},
              "payload":{{}}}}"#,
            repo_id * 1000 + user_id,
            user_id,
            login,
            repo_id,
            repo,
            extra
        )
        .replace('\n', "")
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let shard = gzip_lines(&[
            "{not json",
            &push_event("alice", 1, "alice/proj", 10, ""),
            "",
        ]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.parsed, 1);
        assert_eq!(batch.users.len(), 1);
    }

    #[test]
    fn test_events_without_actor_are_ignored() {
        let shard = gzip_lines(&[
            r#"{"type":"GistEvent","created_at":"2013-03-04T10:00:00Z","payload":{}}"#,
        ]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(batch.parsed, 0);
        assert_eq!(batch.ignored, 1);
        assert_eq!(batch.skipped, 0);
    }

    #[test]
    fn test_last_non_null_wins_within_shard() {
        let shard = gzip_lines(&[
            r#"{"type":"WatchEvent","created_at":"2013-03-04T10:00:00Z",
                "actor":{"id":1,"login":"alice","name":"Alice"},
                "repo":{"id":10,"name":"alice/proj"}}"#
                .replace('\n', "")
                .as_str(),
            r#"{"type":"WatchEvent","created_at":"2013-03-04T11:00:00Z",
                "actor":{"id":1,"login":"alice","name":"Alice B.","location":"Berlin"},
                "repo":{"id":10,"name":"alice/proj"}}"#
                .replace('\n', "")
                .as_str(),
            r#"{"type":"WatchEvent","created_at":"2013-03-04T12:00:00Z",
                "actor":{"id":1,"login":"alice"},
                "repo":{"id":10,"name":"alice/proj"}}"#
                .replace('\n', "")
                .as_str(),
        ]);
        let batch = parse_shard("test", &shard).unwrap();
        let alice = &batch.users[&1];
        // The third observation carried no name; the second one's value holds.
        assert_eq!(alice.name.as_deref(), Some("Alice B."));
        assert_eq!(alice.location.as_deref(), Some("Berlin"));
    }

    #[test]
    fn test_nested_entities_are_normalized() {
        let line = r#"{"type":"ForkEvent","created_at":"2013-03-04T10:00:00Z",
            "actor":{"id":1,"login":"alice"},
            "repo":{"id":10,"name":"proj","fork":true,
                "owner":{"id":1,"login":"alice"},
                "source":{"id":20,"name":"proj",
                    "owner":{"id":2,"login":"bob"},"language":"Rust"}}}"#
            .replace('\n', "");
        let shard = gzip_lines(&[&line]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(batch.users.len(), 2);
        assert_eq!(batch.repos.len(), 2);
        assert_eq!(batch.repos[&10].fullname, "alice/proj");
        assert_eq!(batch.repos[&20].fullname, "bob/proj");
        assert_eq!(batch.repos[&20].language.as_deref(), Some("Rust"));
    }

    #[test]
    fn test_self_referential_repo_terminates() {
        // A repo that claims itself as parent and source. No upstream
        // guarantee rules this out, so the visited set has to.
        let line = r#"{"type":"ForkEvent","created_at":"2013-03-04T10:00:00Z",
            "actor":{"id":1,"login":"alice"},
            "repo":{"id":10,"name":"alice/proj",
                "parent":{"id":10,"name":"alice/proj",
                    "parent":{"id":10,"name":"alice/proj"}},
                "source":{"id":10,"name":"alice/proj"}}}"#
            .replace('\n', "");
        let shard = gzip_lines(&[&line]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(batch.parsed, 1);
        assert_eq!(batch.repos.len(), 1);
    }

    #[test]
    fn test_push_weight_from_payload_size() {
        let line = r#"{"type":"PushEvent","created_at":"2013-03-04T10:00:00Z",
            "actor":{"id":1,"login":"alice"},
            "repo":{"id":10,"name":"alice/proj"},
            "payload":{"size":12}}"#
            .replace('\n', "");
        let shard = gzip_lines(&[&line]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(batch.observations[0].weight, 12);
    }

    #[test]
    fn test_weekday_is_monday_first() {
        // 2013-03-04 was a Monday.
        let shard = gzip_lines(&[&push_event("alice", 1, "alice/proj", 10, "")]);
        let batch = parse_shard("test", &shard).unwrap();
        let obs = &batch.observations[0];
        assert_eq!(obs.weekday, 0);
        assert_eq!(obs.hour, 10);
    }

    #[test]
    fn test_owner_login_string_shape() {
        let line = r#"{"type":"WatchEvent","created_at":"2013-03-04 10:00:00",
            "actor":{"id":1,"login":"alice"},
            "repository":{"id":10,"name":"proj","owner":"bob","language":"C"}}"#
            .replace('\n', "");
        let shard = gzip_lines(&[&line]);
        let batch = parse_shard("test", &shard).unwrap();
        let obs = &batch.observations[0];
        assert_eq!(obs.repo_fullname, "bob/proj");
        assert_eq!(obs.owner_key.as_deref(), Some("bob"));
        // A bare login cannot produce a user row.
        assert_eq!(batch.users.len(), 1);
    }

    #[test]
    fn test_commit_messages_collected_from_both_shapes() {
        let line = r#"{"type":"PushEvent","created_at":"2013-03-04T10:00:00Z",
            "actor":{"id":1,"login":"alice"},
            "repo":{"id":10,"name":"alice/proj"},
            "payload":{"size":2,
                "shas":[["abc","a@example.com","fix the build","alice"]],
                "commits":[{"message":"second try"}]}}"#
            .replace('\n', "");
        let shard = gzip_lines(&[&line]);
        let batch = parse_shard("test", &shard).unwrap();
        assert_eq!(
            batch.observations[0].commit_messages,
            vec!["fix the build".to_string(), "second try".to_string()]
        );
    }
}
