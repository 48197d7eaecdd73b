//! Conversation threads (read-only view)
//!
//! Threads are owned by an external tracker. The governor only reads them to
//! decide whether a quiet conversation deserves a follow-up.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::store;

/// Thread lifecycle as reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Waiting,
    Paused,
    Resolved,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Resolved => "resolved",
        }
    }
}

/// A tracked conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub topic: String,
    pub status: ThreadStatus,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub message_count: u32,
}

impl Thread {
    /// Time since the last message
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_activity)
    }

    /// Unresolved and quiet for longer than `stale_after`
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status != ThreadStatus::Resolved && self.age(now) > stale_after
    }
}

/// Staleness threshold from an hour count, capped at roughly a century
pub fn stale_threshold(hours: u64) -> Duration {
    Duration::hours(hours.min(24 * 365 * 100) as i64)
}

/// Read access to the tracker's threads
pub trait ThreadStore: Send + Sync {
    fn threads(&self) -> Vec<Thread>;
}

impl ThreadStore for Vec<Thread> {
    fn threads(&self) -> Vec<Thread> {
        self.clone()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ThreadsDocument {
    #[serde(default)]
    threads: Vec<Thread>,
}

/// Reads `state/threads.json` as written by the thread tracker
pub struct JsonThreadStore {
    path: PathBuf,
}

impl JsonThreadStore {
    pub fn open(workspace: &Path) -> Self {
        Self {
            path: store::state_path(workspace, store::THREADS_FILE),
        }
    }
}

impl ThreadStore for JsonThreadStore {
    fn threads(&self) -> Vec<Thread> {
        store::load_document::<ThreadsDocument>(&self.path).threads
    }
}
