//! Autonomous Behavior
//!
//! Self-initiated behavior of the agent:
//! - Attention: concern parsing and urgency scoring
//! - Cognitive loop: schedules reflection from the urgency signal
//! - Proactive evaluation: decides whether a dormant thread gets a follow-up

mod attention;
mod cognitive_loop;
mod proactive;

pub use attention::{
    compute_urgency_score, parse_concerns, AttentionState, Concern, ConcernPriority, TimeContext,
    TimePeriod, QUIET_AFTER,
};
pub use cognitive_loop::{
    AttentionSource, CognitiveLoop, LoopConfig, LoopState, LoopStatsSnapshot, ThinkCallback,
};
pub use proactive::{
    parse_judgment, prune_sent_records, Judgment, ProactiveAction, ProactiveConfig,
    ProactiveDecision, ProactiveEvaluator, ProactiveState, RateLimit, SentRecord, ThreadFollowUp,
};
