//! Trust Manager
//!
//! Owns the single trust score that gates how much the agent may do alone.
//! Feedback arrives as signed signals; the score moves by the signal weight
//! and is clamped to [0, 1] after every mutation.
//!
//! Score to scope mapping:
//! - `< 0.40`        → autonomous only
//! - `0.40 .. 0.75`  → autonomous + propose
//! - `>= 0.75`       → autonomous + propose + extended
//!
//! A critical failure drops the score to 0.1 and freezes the scope to
//! autonomous-only for 14 days. Signals recorded during the freeze still
//! move the score; they just can't widen the scope until the freeze ends.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authority::{ActionCategory, ActionTier, TierOverrides};
use crate::clock::Clock;
use crate::store::{self, StoreError};

/// Score of a fresh agent
pub const DEFAULT_TRUST_SCORE: f64 = 0.5;
/// Score forced by a critical failure
pub const CRITICAL_FAILURE_SCORE: f64 = 0.1;
/// Weight of the negative signal recorded for a critical failure
pub const CRITICAL_FAILURE_WEIGHT: f64 = 0.4;
/// Length of the critical-failure freeze
pub const FREEZE_DAYS: i64 = 14;

/// Direction of a trust signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Positive,
    Negative,
}

impl SignalKind {
    fn sign(&self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }
}

/// One piece of feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub value: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl TrustSignal {
    pub fn positive(value: f64, source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: SignalKind::Positive,
            value,
            source: source.into(),
            timestamp,
        }
    }

    pub fn negative(value: f64, source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: SignalKind::Negative,
            value,
            source: source.into(),
            timestamp,
        }
    }

    fn delta(&self) -> f64 {
        self.kind.sign() * self.value
    }
}

/// Persisted trust document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustState {
    pub trust_score: f64,
    #[serde(default)]
    pub signals: Vec<TrustSignal>,
    #[serde(default)]
    pub frozen_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: DateTime<Utc>,
}

impl Default for TrustState {
    fn default() -> Self {
        Self {
            trust_score: DEFAULT_TRUST_SCORE,
            signals: Vec::new(),
            frozen_until: None,
            last_updated: DateTime::<Utc>::default(),
        }
    }
}

/// Tiers reachable at a given trust level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    Autonomous,
    Propose,
    /// Promotable propose-tier actions run without approval
    Extended,
}

impl ScopeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Propose => "propose",
            Self::Extended => "extended",
        }
    }
}

/// Result of [`TrustManager::evaluate_scope`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScope {
    pub score: f64,
    pub allowed_tiers: Vec<ScopeTier>,
    pub frozen: bool,
}

impl TrustScope {
    pub fn allows(&self, tier: ScopeTier) -> bool {
        self.allowed_tiers.contains(&tier)
    }
}

impl TierOverrides for TrustScope {
    fn override_for(&self, category: ActionCategory) -> Option<ActionTier> {
        if category.default_tier() != ActionTier::Propose {
            return None;
        }
        if !self.allows(ScopeTier::Propose) {
            // Not trusted enough to even ask
            return Some(ActionTier::Restricted);
        }
        if self.allows(ScopeTier::Extended) && category.is_promotable() {
            return Some(ActionTier::Autonomous);
        }
        None
    }
}

/// Tunables for the trust manager
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Signals kept in history (oldest dropped)
    pub max_signals: usize,
    /// Score at which propose becomes reachable
    pub propose_threshold: f64,
    /// Score at which the extended tier becomes reachable
    pub extended_threshold: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            max_signals: 200,
            propose_threshold: 0.4,
            extended_threshold: 0.75,
        }
    }
}

/// Map a score to its tier scope (ignores freezes)
pub fn scope_for_score(score: f64, config: &TrustConfig) -> Vec<ScopeTier> {
    let mut tiers = vec![ScopeTier::Autonomous];
    if score >= config.propose_threshold {
        tiers.push(ScopeTier::Propose);
    }
    if score >= config.extended_threshold {
        tiers.push(ScopeTier::Extended);
    }
    tiers
}

/// Trust score owner
pub struct TrustManager {
    path: PathBuf,
    state: TrustState,
    config: TrustConfig,
    clock: Arc<dyn Clock>,
}

impl TrustManager {
    /// Open the manager for a workspace and load persisted state
    pub fn open(workspace: &Path, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(workspace, clock, TrustConfig::default())
    }

    pub fn with_config(workspace: &Path, clock: Arc<dyn Clock>, config: TrustConfig) -> Self {
        let mut manager = Self {
            path: store::state_path(workspace, store::TRUST_FILE),
            state: TrustState::default(),
            config,
            clock,
        };
        manager.load();
        manager
    }

    /// Reload from disk. Missing or corrupt state resets to the default score.
    pub fn load(&mut self) {
        let mut state: TrustState = store::load_document(&self.path);
        if !state.trust_score.is_finite() {
            warn!("Persisted trust score is not a number, resetting");
            state.trust_score = DEFAULT_TRUST_SCORE;
        }
        state.trust_score = state.trust_score.clamp(0.0, 1.0);
        self.state = state;
        self.prune_signals();
    }

    pub fn save(&self) -> Result<(), StoreError> {
        store::save_document(&self.path, &self.state)
    }

    pub fn score(&self) -> f64 {
        self.state.trust_score
    }

    pub fn signal_history(&self) -> &[TrustSignal] {
        &self.state.signals
    }

    pub fn state(&self) -> TrustState {
        self.state.clone()
    }

    pub fn frozen_until(&self) -> Option<DateTime<Utc>> {
        self.state.frozen_until
    }

    pub fn is_frozen(&self) -> bool {
        self.state
            .frozen_until
            .map(|until| self.clock.now() < until)
            .unwrap_or(false)
    }

    /// Apply a signal: move the score by its signed weight, then clamp
    pub fn record_signal(&mut self, signal: TrustSignal) {
        if !signal.value.is_finite() || signal.value < 0.0 {
            warn!(
                "Ignoring trust signal from {} with invalid weight {}",
                signal.source, signal.value
            );
            return;
        }

        let before = self.state.trust_score;
        self.state.trust_score = (before + signal.delta()).clamp(0.0, 1.0);
        self.state.last_updated = self.clock.now();

        debug!(
            "Trust {:.3} -> {:.3} ({:?} {:.3} from {})",
            before, self.state.trust_score, signal.kind, signal.value, signal.source
        );

        self.state.signals.push(signal);
        self.prune_signals();
    }

    /// Hard reset after something went badly wrong.
    ///
    /// Sets (not subtracts) the score to 0.1 and freezes scope for 14 days.
    pub fn record_critical_failure(&mut self, description: &str) {
        let now = self.clock.now();

        self.state.trust_score = CRITICAL_FAILURE_SCORE;
        self.state.signals.push(TrustSignal::negative(
            CRITICAL_FAILURE_WEIGHT,
            format!("critical-failure: {}", description),
            now,
        ));
        self.prune_signals();

        let until = now + Duration::days(FREEZE_DAYS);
        self.state.frozen_until = Some(until);
        self.state.last_updated = now;

        info!(
            "Trust frozen until {} after critical failure: {}",
            until.to_rfc3339(),
            description
        );
    }

    /// Tiers currently reachable
    pub fn evaluate_scope(&self) -> TrustScope {
        let score = self.state.trust_score;
        let frozen = self.is_frozen();

        let allowed_tiers = if frozen {
            vec![ScopeTier::Autonomous]
        } else {
            scope_for_score(score, &self.config)
        };

        TrustScope {
            score,
            allowed_tiers,
            frozen,
        }
    }

    /// One-paragraph human-readable status
    pub fn observable_summary(&self) -> String {
        let scope = self.evaluate_scope();
        let tiers: Vec<&str> = scope.allowed_tiers.iter().map(|t| t.as_str()).collect();

        let mut summary = format!(
            "Trust score: {:.2} (scope: {}; {} signals recorded)",
            scope.score,
            tiers.join(", "),
            self.state.signals.len()
        );

        if scope.frozen {
            let until = self
                .state
                .frozen_until
                .map(|u| u.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default();
            summary.push_str(&format!(
                "\nFROZEN: a critical failure triggered a {}-day trust freeze (until {}). \
                 Only autonomous actions are allowed until it expires.",
                FREEZE_DAYS, until
            ));
        }

        summary
    }

    fn prune_signals(&mut self) {
        let overflow = self
            .state
            .signals
            .len()
            .saturating_sub(self.config.max_signals);
        if overflow > 0 {
            self.state.signals.drain(..overflow);
        }
    }
}
