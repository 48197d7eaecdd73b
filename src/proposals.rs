//! Proposal Queue
//!
//! Durable queue of actions waiting for a human decision. A proposal moves
//! `pending -> approved | rejected` exactly once. Resolved proposals beyond
//! the retention cap are pruned oldest first; pending ones are never pruned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::store::{self, StoreError};

/// Resolved proposals kept after pruning
pub const RESOLVED_RETENTION: usize = 50;

/// Proposal misuse errors
#[derive(Error, Debug, PartialEq)]
pub enum ProposalError {
    #[error("Proposal not found: {0}")]
    NotFound(String),
    #[error("Proposal {id} already resolved as {status}")]
    AlreadyResolved { id: String, status: ProposalStatus },
}

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human decision on a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Rejected,
}

impl Resolution {
    fn status(&self) -> ProposalStatus {
        match self {
            Self::Approved => ProposalStatus::Approved,
            Self::Rejected => ProposalStatus::Rejected,
        }
    }
}

/// What the agent wants to do. Extra fields are carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProposedAction {
    pub fn new(kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: target.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Input for [`ProposalQueue::enqueue`]
#[derive(Debug, Clone)]
pub struct ProposalInput {
    pub action: ProposedAction,
    pub reason: String,
    pub context: String,
}

/// A queued proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub action: ProposedAction,
    pub reason: String,
    pub context: String,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// One-line description for status listings
    pub fn format(&self) -> String {
        format!(
            "[{}] {} {} -> {} ({})",
            self.id.chars().take(8).collect::<String>(),
            self.status,
            self.action.kind,
            self.action.target,
            self.reason
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposalDocument {
    #[serde(default)]
    proposals: Vec<Proposal>,
    #[serde(default)]
    last_updated: DateTime<Utc>,
}

/// Durable approval queue
pub struct ProposalQueue {
    path: PathBuf,
    doc: ProposalDocument,
    clock: Arc<dyn Clock>,
}

impl ProposalQueue {
    /// Open the queue for a workspace and load persisted proposals
    pub fn open(workspace: &Path, clock: Arc<dyn Clock>) -> Self {
        let mut queue = Self {
            path: store::state_path(workspace, store::PROPOSALS_FILE),
            doc: ProposalDocument::default(),
            clock,
        };
        queue.load();
        queue
    }

    /// Reload from disk, replacing in-memory state
    pub fn load(&mut self) {
        self.doc = store::load_document(&self.path);
    }

    pub fn save(&self) -> Result<(), StoreError> {
        store::save_document(&self.path, &self.doc)
    }

    /// Append a new pending proposal and return its id
    pub fn enqueue(&mut self, input: ProposalInput) -> String {
        let now = self.clock.now();
        let id = uuid::Uuid::new_v4().to_string();

        info!(
            "Queued proposal {} ({} -> {})",
            &id[..8],
            input.action.kind,
            input.action.target
        );

        self.doc.proposals.push(Proposal {
            id: id.clone(),
            action: input.action,
            reason: input.reason,
            context: input.context,
            status: ProposalStatus::Pending,
            created_at: now,
            resolved_at: None,
        });
        self.doc.last_updated = now;

        id
    }

    pub fn list(&self) -> Vec<Proposal> {
        self.doc.proposals.clone()
    }

    pub fn pending(&self) -> Vec<Proposal> {
        self.doc
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Proposal> {
        self.doc.proposals.iter().find(|p| p.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.doc
            .proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Pending)
            .count()
    }

    /// Resolve a pending proposal. Unknown or already-resolved ids are errors.
    pub fn resolve(&mut self, id: &str, resolution: Resolution) -> Result<Proposal, ProposalError> {
        let now = self.clock.now();

        let proposal = self
            .doc
            .proposals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ProposalError::NotFound(id.to_string()))?;

        if proposal.status != ProposalStatus::Pending {
            return Err(ProposalError::AlreadyResolved {
                id: id.to_string(),
                status: proposal.status,
            });
        }

        proposal.status = resolution.status();
        proposal.resolved_at = Some(now);
        let resolved = proposal.clone();

        self.doc.last_updated = now;
        self.prune_resolved();

        debug!("Proposal {} resolved as {}", id, resolved.status);
        Ok(resolved)
    }

    /// Drop the oldest resolved proposals beyond the retention cap
    fn prune_resolved(&mut self) {
        let resolved = self
            .doc
            .proposals
            .iter()
            .filter(|p| p.status != ProposalStatus::Pending)
            .count();
        let excess = resolved.saturating_sub(RESOLVED_RETENTION);
        if excess == 0 {
            return;
        }

        // Oldest resolution first; ties broken by creation time
        let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>, String)> = self
            .doc
            .proposals
            .iter()
            .filter(|p| p.status != ProposalStatus::Pending)
            .map(|p| (p.resolved_at.unwrap_or(p.created_at), p.created_at, p.id.clone()))
            .collect();
        candidates.sort();

        let doomed: Vec<String> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, _, id)| id)
            .collect();

        self.doc
            .proposals
            .retain(|p| p.status == ProposalStatus::Pending || !doomed.contains(&p.id));

        debug!("Pruned {} resolved proposals", doomed.len());
    }
}
