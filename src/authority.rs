//! Action Authority
//!
//! Tiered gate for everything the agent wants to do on its own:
//! - **Autonomous**: executes immediately
//! - **Propose**: held for human approval in the proposal queue
//! - **Restricted**: never executes, whatever the trust level
//!
//! Every request is written to an append-only action log (capped, oldest
//! dropped) that downstream trust-signal derivation reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{self, StoreError};

/// Maximum entries kept in the action log
pub const ACTION_LOG_CAP: usize = 500;

/// Concrete kinds of action the agent can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionCategory {
    ReadWorkspace,
    SearchMemory,
    WriteMemory,
    Reflect,
    WriteWorkspace,
    CreateReminder,
    WebRequest,
    SendMessage,
    RunCommand,
    ModifyConfig,
    DeleteFile,
    Financial,
    CredentialAccess,
    /// Anything we don't recognise. Always restricted.
    Unknown,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 14] = [
        Self::ReadWorkspace,
        Self::SearchMemory,
        Self::WriteMemory,
        Self::Reflect,
        Self::WriteWorkspace,
        Self::CreateReminder,
        Self::WebRequest,
        Self::SendMessage,
        Self::RunCommand,
        Self::ModifyConfig,
        Self::DeleteFile,
        Self::Financial,
        Self::CredentialAccess,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWorkspace => "read-workspace",
            Self::SearchMemory => "search-memory",
            Self::WriteMemory => "write-memory",
            Self::Reflect => "reflect",
            Self::WriteWorkspace => "write-workspace",
            Self::CreateReminder => "create-reminder",
            Self::WebRequest => "web-request",
            Self::SendMessage => "send-message",
            Self::RunCommand => "run-command",
            Self::ModifyConfig => "modify-config",
            Self::DeleteFile => "delete-file",
            Self::Financial => "financial",
            Self::CredentialAccess => "credential-access",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name. Unrecognised names map to [`ActionCategory::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "read-workspace" => Self::ReadWorkspace,
            "search-memory" => Self::SearchMemory,
            "write-memory" => Self::WriteMemory,
            "reflect" => Self::Reflect,
            "write-workspace" => Self::WriteWorkspace,
            "create-reminder" => Self::CreateReminder,
            "web-request" => Self::WebRequest,
            "send-message" => Self::SendMessage,
            "run-command" => Self::RunCommand,
            "modify-config" => Self::ModifyConfig,
            "delete-file" | "file-delete" => Self::DeleteFile,
            "financial" => Self::Financial,
            "credential-access" => Self::CredentialAccess,
            _ => Self::Unknown,
        }
    }

    /// Tier from the built-in table, before any trust override
    pub fn default_tier(&self) -> ActionTier {
        match self {
            Self::ReadWorkspace | Self::SearchMemory | Self::WriteMemory | Self::Reflect => {
                ActionTier::Autonomous
            }
            Self::WriteWorkspace
            | Self::CreateReminder
            | Self::WebRequest
            | Self::SendMessage
            | Self::RunCommand => ActionTier::Propose,
            Self::ModifyConfig
            | Self::DeleteFile
            | Self::Financial
            | Self::CredentialAccess
            | Self::Unknown => ActionTier::Restricted,
        }
    }

    /// Restricted categories can never be lifted by any override
    pub fn is_structurally_restricted(&self) -> bool {
        self.default_tier() == ActionTier::Restricted
    }

    /// Propose-tier categories that high trust may promote to autonomous
    pub fn is_promotable(&self) -> bool {
        matches!(
            self,
            Self::WriteWorkspace | Self::CreateReminder | Self::WebRequest
        )
    }
}

impl From<String> for ActionCategory {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ActionCategory> for String {
    fn from(c: ActionCategory) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an action is allowed to proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTier {
    Autonomous,
    Propose,
    Restricted,
}

impl ActionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Propose => "propose",
            Self::Restricted => "restricted",
        }
    }
}

/// Why a request was not approved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Needs human approval; the caller enqueues a proposal
    PendingProposal,
    /// Structurally forbidden
    Restricted,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingProposal => "pending_proposal",
            Self::Restricted => "restricted",
        }
    }
}

/// Per-category tier overrides layered over the default table
pub trait TierOverrides {
    fn override_for(&self, category: ActionCategory) -> Option<ActionTier>;
}

impl TierOverrides for HashMap<ActionCategory, ActionTier> {
    fn override_for(&self, category: ActionCategory) -> Option<ActionTier> {
        self.get(&category).copied()
    }
}

/// Classify a category into a tier.
///
/// Restricted categories are decided before overrides are consulted, so no
/// override table can lift them. Otherwise an override wins over the default.
pub fn classify_action(
    category: ActionCategory,
    overrides: Option<&dyn TierOverrides>,
) -> ActionTier {
    if category.is_structurally_restricted() {
        return ActionTier::Restricted;
    }

    overrides
        .and_then(|o| o.override_for(category))
        .unwrap_or_else(|| category.default_tier())
}

/// Classify a category given by wire name (unknown names fail closed)
pub fn classify_action_name(name: &str, overrides: Option<&dyn TierOverrides>) -> ActionTier {
    classify_action(ActionCategory::parse(name), overrides)
}

/// A request to perform an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub category: ActionCategory,
    pub tier: ActionTier,
    pub description: String,
}

impl ActionRequest {
    pub fn new(category: ActionCategory, tier: ActionTier, description: impl Into<String>) -> Self {
        Self {
            category,
            tier,
            description: description.into(),
        }
    }
}

/// Outcome of [`ActionAuthority::request_action`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl ActionResult {
    fn approved(at: DateTime<Utc>) -> Self {
        Self {
            approved: true,
            reason: None,
            executed_at: Some(at),
        }
    }

    fn denied(reason: DenialReason) -> Self {
        Self {
            approved: false,
            reason: Some(reason),
            executed_at: None,
        }
    }
}

/// One audit record per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub category: ActionCategory,
    pub tier: ActionTier,
    pub description: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted action log document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionLogDocument {
    #[serde(default)]
    entries: Vec<ActionLogEntry>,
    #[serde(default)]
    last_updated: DateTime<Utc>,
}

/// Enforces action tiers and keeps the audit log
pub struct ActionAuthority {
    path: PathBuf,
    log: ActionLogDocument,
    clock: Arc<dyn Clock>,
}

impl ActionAuthority {
    /// Open the authority for a workspace, loading any existing log
    pub fn open(workspace: &Path, clock: Arc<dyn Clock>) -> Self {
        let path = store::state_path(workspace, store::ACTION_LOG_FILE);
        let log = store::load_document(&path);
        Self { path, log, clock }
    }

    /// Decide a request. Always appends exactly one log entry.
    pub fn request_action(&mut self, request: &ActionRequest) -> ActionResult {
        let now = self.clock.now();

        // Caller-supplied tiers cannot unlock a restricted category
        let tier = if request.category.is_structurally_restricted() {
            ActionTier::Restricted
        } else {
            request.tier
        };

        let result = match tier {
            ActionTier::Autonomous => ActionResult::approved(now),
            ActionTier::Propose => ActionResult::denied(DenialReason::PendingProposal),
            ActionTier::Restricted => ActionResult::denied(DenialReason::Restricted),
        };

        debug!(
            category = request.category.as_str(),
            tier = tier.as_str(),
            approved = result.approved,
            "Action decision"
        );

        self.append(ActionLogEntry {
            category: request.category,
            tier,
            description: request.description.clone(),
            approved: result.approved,
            reason: result.reason,
            timestamp: now,
        });

        result
    }

    /// Most recent `n` log entries, oldest first
    pub fn recent(&self, n: usize) -> &[ActionLogEntry] {
        let start = self.log.entries.len().saturating_sub(n);
        &self.log.entries[start..]
    }

    pub fn log_len(&self) -> usize {
        self.log.entries.len()
    }

    /// Persist the log
    pub fn save(&self) -> Result<(), StoreError> {
        store::save_document(&self.path, &self.log)
    }

    fn append(&mut self, entry: ActionLogEntry) {
        self.log.last_updated = entry.timestamp;
        self.log.entries.push(entry);

        let overflow = self.log.entries.len().saturating_sub(ACTION_LOG_CAP);
        if overflow > 0 {
            self.log.entries.drain(..overflow);
        }

        if let Err(e) = self.save() {
            warn!("Failed to persist action log: {}", e);
        }
    }
}
