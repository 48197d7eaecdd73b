//! Governor
//!
//! Wires the persistent components together for one workspace. Every action
//! the agent wants to take goes through [`Governor::gate`]; human decisions on
//! proposals come back through [`Governor::resolve_proposal`] and feed trust.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::authority::{
    classify_action, ActionAuthority, ActionCategory, ActionRequest, DenialReason,
};
use crate::autonomous::{AttentionSource, ProactiveConfig, ProactiveDecision, ProactiveEvaluator};
use crate::clock::Clock;
use crate::llm::LlmBackend;
use crate::proposals::{
    Proposal, ProposalError, ProposalInput, ProposalQueue, ProposedAction, Resolution,
};
use crate::store::StoreError;
use crate::threads::{stale_threshold, ThreadStore};
use crate::trust::{TrustManager, TrustSignal};

/// Concerns document at the workspace root
pub const CONCERNS_FILE: &str = "CONCERNS.md";

/// Trust gained when a human approves a proposal
pub const APPROVAL_SIGNAL: f64 = 0.02;
/// Trust lost when a human rejects a proposal
pub const REJECTION_SIGNAL: f64 = 0.03;

#[derive(Error, Debug)]
pub enum GovernorError {
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to a gated action
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Run it now
    Approved { executed_at: DateTime<Utc> },
    /// Queued for human approval
    Proposed { proposal_id: String },
    /// Not allowed under any circumstances at this trust level
    Restricted,
}

pub struct Governor {
    workspace: PathBuf,
    trust: TrustManager,
    authority: ActionAuthority,
    proposals: ProposalQueue,
    proactive: ProactiveEvaluator,
}

impl Governor {
    pub fn open(
        workspace: &Path,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn LlmBackend>,
        threads: Arc<dyn ThreadStore>,
        proactive: ProactiveConfig,
    ) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            trust: TrustManager::open(workspace, clock.clone()),
            authority: ActionAuthority::open(workspace, clock.clone()),
            proposals: ProposalQueue::open(workspace, clock.clone()),
            proactive: ProactiveEvaluator::open(workspace, proactive, backend, threads, clock),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn trust(&self) -> &TrustManager {
        &self.trust
    }

    pub fn trust_mut(&mut self) -> &mut TrustManager {
        &mut self.trust
    }

    pub fn authority(&self) -> &ActionAuthority {
        &self.authority
    }

    pub fn proposals(&self) -> &ProposalQueue {
        &self.proposals
    }

    pub fn proactive(&self) -> &ProactiveEvaluator {
        &self.proactive
    }

    pub fn proactive_mut(&mut self) -> &mut ProactiveEvaluator {
        &mut self.proactive
    }

    /// Decide whether an action may run, queueing a proposal when it needs approval.
    ///
    /// Without an explicit `proposal`, one is built from the category and description.
    pub fn gate(
        &mut self,
        category: ActionCategory,
        description: &str,
        proposal: Option<ProposalInput>,
    ) -> Result<GateOutcome, StoreError> {
        let scope = self.trust.evaluate_scope();
        let tier = classify_action(category, Some(&scope));
        let result = self
            .authority
            .request_action(&ActionRequest::new(category, tier, description));

        match result.reason {
            None => Ok(GateOutcome::Approved {
                executed_at: result.executed_at.unwrap_or_default(),
            }),
            Some(DenialReason::Restricted) => Ok(GateOutcome::Restricted),
            Some(DenialReason::PendingProposal) => {
                let input = proposal.unwrap_or_else(|| ProposalInput {
                    action: ProposedAction::new(category.as_str(), description),
                    reason: format!("{} requires approval", category),
                    context: format!("trust score {:.2}", scope.score),
                });
                let proposal_id = self.proposals.enqueue(input);
                self.proposals.save()?;
                Ok(GateOutcome::Proposed { proposal_id })
            }
        }
    }

    /// Apply a human decision and feed it back into trust
    pub fn resolve_proposal(
        &mut self,
        id: &str,
        resolution: Resolution,
    ) -> Result<Proposal, GovernorError> {
        let proposal = self.proposals.resolve(id, resolution)?;
        self.proposals.save()?;

        let now = proposal.resolved_at.unwrap_or_default();
        let source = format!("proposal:{}", proposal.id);
        let signal = match resolution {
            Resolution::Approved => TrustSignal::positive(APPROVAL_SIGNAL, source, now),
            Resolution::Rejected => TrustSignal::negative(REJECTION_SIGNAL, source, now),
        };
        self.trust.record_signal(signal);
        self.trust.save()?;

        info!(
            "Proposal {} {}, trust now {:.2}",
            proposal.id,
            proposal.status,
            self.trust.score()
        );
        Ok(proposal)
    }

    pub fn record_critical_failure(&mut self, description: &str) -> Result<(), StoreError> {
        self.trust.record_critical_failure(description);
        self.trust.save()
    }

    /// Score stale threads for proactive follow-up.
    ///
    /// Reloads the proactive document first so sends recorded by the
    /// dispatcher since the last scan count against the rate limits.
    pub async fn scan_threads(&mut self, stale_after_hours: u64) -> Vec<ProactiveDecision> {
        self.proactive.load();
        self.proactive.evaluate_active_threads(stale_after_hours).await
    }
}

/// Attention inputs read from a workspace on every tick
pub struct WorkspaceAttention {
    workspace: PathBuf,
    clock: Arc<dyn Clock>,
    threads: Arc<dyn ThreadStore>,
    stale_after: Duration,
}

impl WorkspaceAttention {
    pub fn new(
        workspace: &Path,
        clock: Arc<dyn Clock>,
        threads: Arc<dyn ThreadStore>,
        stale_after_hours: u64,
    ) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            clock,
            threads,
            stale_after: stale_threshold(stale_after_hours),
        }
    }
}

impl AttentionSource for WorkspaceAttention {
    fn concerns_document(&self) -> String {
        let path = self.workspace.join(CONCERNS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(doc) => doc,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    fn pending_actions(&self) -> usize {
        ProposalQueue::open(&self.workspace, self.clock.clone()).pending_count()
    }

    fn has_stale_threads(&self) -> bool {
        let now = self.clock.now();
        self.threads
            .threads()
            .iter()
            .any(|t| t.is_stale(now, self.stale_after))
    }
}
