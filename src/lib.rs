//! Autonomy Governor
//!
//! Decides what a personal agent may do on its own, when it should reflect,
//! and whether a quiet conversation is worth resuming.
//!
//! # Features
//!
//! - **Trust**: scalar trust score fed by human feedback, with a 14-day freeze on critical failure
//! - **Action Authority**: autonomous / propose / restricted tiers with no bypass for restricted
//! - **Proposal Queue**: durable approval queue with bounded retention
//! - **Cognitive Loop**: urgency-driven, time-of-day-aware reflection scheduling
//! - **Proactive Evaluation**: model-scored follow-ups under strict rate limits
//!
//! # Architecture
//!
//! ```text
//! CognitiveLoop ──► think ──► ProactiveEvaluator ──► LlmBackend (Ollama)
//!      │                            │
//!      │                            └── ThreadStore (state/threads.json)
//!      │
//!      └── AttentionSource (CONCERNS.md, pending proposals, stale threads)
//!
//! Governor::gate ──► TrustManager::evaluate_scope ──► classify_action
//!                         │                               │
//!                         │                     ActionAuthority::request_action
//!                         │                               │
//!                         └──── resolve_proposal ◄── ProposalQueue
//! ```

pub mod authority;
pub mod autonomous;
pub mod clock;
pub mod config;
pub mod governor;
pub mod llm;
pub mod proposals;
pub mod store;
pub mod threads;
pub mod trust;

pub use authority::{
    classify_action, classify_action_name, ActionAuthority, ActionCategory, ActionLogEntry,
    ActionRequest, ActionResult, ActionTier, DenialReason, TierOverrides,
};
pub use autonomous::{
    compute_urgency_score, parse_concerns, AttentionSource, AttentionState, CognitiveLoop,
    LoopConfig, ProactiveAction, ProactiveConfig, ProactiveDecision, ProactiveEvaluator,
    ThinkCallback,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GovernorConfig};
pub use governor::{GateOutcome, Governor, GovernorError, WorkspaceAttention};
pub use llm::{LlmBackend, OllamaBackend, OllamaConfig};
pub use proposals::{Proposal, ProposalError, ProposalInput, ProposalQueue, ProposedAction, Resolution};
pub use store::StoreError;
pub use threads::{JsonThreadStore, Thread, ThreadStatus, ThreadStore};
pub use trust::{TrustManager, TrustScope, TrustSignal, TrustState};
