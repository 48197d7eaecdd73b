//! Governor Integration Tests
//!
//! Trust, authority and proposal behavior through the public API, with state
//! persisted to a temporary workspace.

use async_trait::async_trait;
use autonomy_governor::trust::ScopeTier;
use autonomy_governor::{
    classify_action, classify_action_name, ActionAuthority, ActionCategory, ActionRequest,
    ActionTier, Clock, DenialReason, GateOutcome, Governor, LlmBackend, ManualClock,
    ProactiveConfig, ProposalError, ProposalInput, ProposalQueue, ProposedAction, Resolution,
    Thread, TrustManager, TrustSignal,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

struct NoModel;

#[async_trait]
impl LlmBackend for NoModel {
    async fn invoke(&self, _prompt: &str) -> Option<String> {
        None
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn setup() -> (TempDir, Arc<ManualClock>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    (temp_dir, Arc::new(ManualClock::new(start())))
}

fn seed_score(trust: &mut TrustManager, clock: &ManualClock, target: f64) {
    let delta = target - trust.score();
    let signal = if delta >= 0.0 {
        TrustSignal::positive(delta, "seed", clock.now())
    } else {
        TrustSignal::negative(-delta, "seed", clock.now())
    };
    trust.record_signal(signal);
}

#[test]
fn test_critical_failure_from_high_trust() {
    let (temp, clock) = setup();
    let mut trust = TrustManager::open(temp.path(), clock.clone());
    seed_score(&mut trust, &clock, 0.9);
    assert!((trust.score() - 0.9).abs() < 1e-9);
    assert!(trust.evaluate_scope().allows(ScopeTier::Extended));

    trust.record_critical_failure("sent unauthorized message");

    assert_eq!(trust.score(), 0.1);
    assert!(trust.is_frozen());
    assert_eq!(trust.evaluate_scope().allowed_tiers, vec![ScopeTier::Autonomous]);

    let last = trust.signal_history().last().unwrap();
    assert_eq!(last.source, "critical-failure: sent unauthorized message");
    assert_eq!(last.value, 0.4);

    let summary = trust.observable_summary();
    assert!(summary.contains("0.10"));
    assert!(summary.contains("FROZEN"));
    assert!(summary.contains("14-day"));
}

#[test]
fn test_freeze_holds_then_expires() {
    let (temp, clock) = setup();
    let mut trust = TrustManager::open(temp.path(), clock.clone());
    trust.record_critical_failure("deleted the wrong folder");

    for _ in 0..40 {
        trust.record_signal(TrustSignal::positive(0.05, "praise", clock.now()));
    }
    assert_eq!(trust.score(), 1.0);
    assert_eq!(trust.evaluate_scope().allowed_tiers, vec![ScopeTier::Autonomous]);

    clock.advance(Duration::days(13));
    assert!(trust.is_frozen());

    clock.advance(Duration::days(1));
    assert!(!trust.is_frozen());
    assert_eq!(
        trust.evaluate_scope().allowed_tiers,
        vec![ScopeTier::Autonomous, ScopeTier::Propose, ScopeTier::Extended]
    );
}

#[test]
fn test_freeze_survives_restart() {
    let (temp, clock) = setup();
    {
        let mut trust = TrustManager::open(temp.path(), clock.clone());
        trust.record_critical_failure("leaked a secret");
        trust.save().unwrap();
    }

    let reopened = TrustManager::open(temp.path(), clock.clone());
    assert!(reopened.is_frozen());
    assert_eq!(reopened.score(), 0.1);
    assert_eq!(reopened.signal_history().len(), 1);
}

#[test]
fn test_restricted_never_approved() {
    let (temp, clock) = setup();
    let mut authority = ActionAuthority::open(temp.path(), clock.clone());
    let mut trust = TrustManager::open(temp.path(), clock.clone());
    seed_score(&mut trust, &clock, 1.0);
    let scope = trust.evaluate_scope();

    assert_eq!(classify_action_name("file-delete", Some(&scope)), ActionTier::Restricted);
    assert_eq!(classify_action_name("launch-rockets", Some(&scope)), ActionTier::Restricted);

    let restricted = [
        ActionCategory::ModifyConfig,
        ActionCategory::DeleteFile,
        ActionCategory::Financial,
        ActionCategory::CredentialAccess,
        ActionCategory::Unknown,
    ];
    for category in restricted {
        assert_eq!(classify_action(category, Some(&scope)), ActionTier::Restricted);
        for tier in [ActionTier::Autonomous, ActionTier::Propose, ActionTier::Restricted] {
            let result = authority.request_action(&ActionRequest::new(category, tier, "try it"));
            assert!(!result.approved);
            assert_eq!(result.reason, Some(DenialReason::Restricted));
        }
    }
    assert_eq!(authority.log_len(), restricted.len() * 3);
}

#[test]
fn test_high_trust_promotes_only_promotable() {
    let (temp, clock) = setup();
    let mut trust = TrustManager::open(temp.path(), clock.clone());
    seed_score(&mut trust, &clock, 0.8);
    let scope = trust.evaluate_scope();

    assert_eq!(classify_action(ActionCategory::WebRequest, Some(&scope)), ActionTier::Autonomous);
    assert_eq!(classify_action(ActionCategory::SendMessage, Some(&scope)), ActionTier::Propose);
    assert_eq!(classify_action(ActionCategory::WebRequest, None), ActionTier::Propose);
}

#[test]
fn test_proposals_round_trip_between_instances() {
    let (temp, clock) = setup();

    let id = {
        let mut queue = ProposalQueue::open(temp.path(), clock.clone());
        let id = queue.enqueue(ProposalInput {
            action: ProposedAction::new("send-message", "dana").with_field("text", "Lunch Friday?"),
            reason: "Dana asked about lunch".to_string(),
            context: "thread quiet for 3 days".to_string(),
        });
        queue.save().unwrap();
        id
    };

    let mut second = ProposalQueue::open(temp.path(), clock.clone());
    assert_eq!(second.pending_count(), 1);
    let stored = second.get(&id).unwrap();
    assert_eq!(stored.action.extra["text"], "Lunch Friday?");

    second.resolve(&id, Resolution::Approved).unwrap();
    second.save().unwrap();
    assert_eq!(second.pending_count(), 0);
    assert_eq!(
        second.resolve(&id, Resolution::Approved).unwrap_err(),
        ProposalError::AlreadyResolved {
            id: id.clone(),
            status: autonomy_governor::proposals::ProposalStatus::Approved
        }
    );

    let third = ProposalQueue::open(temp.path(), clock);
    assert_eq!(third.pending_count(), 0);
    assert!(third.get(&id).unwrap().resolved_at.is_some());
}

#[test]
fn test_governor_approval_cycle() {
    let (temp, clock) = setup();
    let mut governor = Governor::open(
        temp.path(),
        clock.clone(),
        Arc::new(NoModel),
        Arc::new(Vec::<Thread>::new()),
        ProactiveConfig::default(),
    );

    let outcome = governor
        .gate(ActionCategory::CreateReminder, "remind about dentist", None)
        .unwrap();
    let GateOutcome::Proposed { proposal_id } = outcome else {
        panic!("expected proposal, got {:?}", outcome);
    };

    governor.resolve_proposal(&proposal_id, Resolution::Rejected).unwrap();
    assert!((governor.trust().score() - 0.47).abs() < 1e-9);

    // Reopen: every component reloads its own document
    let mut reopened = Governor::open(
        temp.path(),
        clock,
        Arc::new(NoModel),
        Arc::new(Vec::<Thread>::new()),
        ProactiveConfig::default(),
    );
    assert!((reopened.trust().score() - 0.47).abs() < 1e-9);
    assert_eq!(reopened.proposals().pending_count(), 0);
    assert_eq!(reopened.authority().log_len(), 1);
    assert_eq!(reopened.authority().recent(1)[0].reason, Some(DenialReason::PendingProposal));

    let decisions = tokio_test::block_on(reopened.scan_threads(48));
    assert!(decisions.is_empty());
}

#[test]
fn test_corrupt_state_falls_back_to_defaults() {
    let (temp, clock) = setup();
    let state_dir = temp.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("trust.json"), "{not json").unwrap();
    std::fs::write(state_dir.join("proposals.json"), "[]]").unwrap();

    let trust = TrustManager::open(temp.path(), clock.clone());
    assert_eq!(trust.score(), 0.5);

    let queue = ProposalQueue::open(temp.path(), clock);
    assert_eq!(queue.pending_count(), 0);
}
