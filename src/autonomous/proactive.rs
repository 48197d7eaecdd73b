//! Proactive Evaluator
//!
//! Decides whether a dormant thread deserves an unsolicited follow-up.
//!
//! Rate limits are checked before the model is consulted, in this order:
//! daily send cap, minimum gap since the last send, per-thread follow-up cap,
//! and threads whose last follow-up was ignored. Only threads that pass are
//! scored by the model backend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::llm::LlmBackend;
use crate::store::{self, StoreError};
use crate::threads::{stale_threshold, Thread, ThreadStore};

const IMPORTANCE_WEIGHT: f64 = 0.4;
const NOVELTY_WEIGHT: f64 = 0.25;
const TIMING_WEIGHT: f64 = 0.2;
const CONFIDENCE_WEIGHT: f64 = 0.15;

const SUB_SCORE_MAX: f64 = 10.0;

/// Window for the daily send cap
const SEND_WINDOW_HOURS: i64 = 24;

/// One proactive message that went out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRecord {
    pub thread_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Follow-up bookkeeping for one thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadFollowUp {
    #[serde(default)]
    pub follow_up_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_follow_up_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ignored: bool,
}

/// Persisted proactive state (`state/proactive.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveState {
    #[serde(default)]
    pub sent_today: Vec<SentRecord>,
    #[serde(default)]
    pub follow_ups_by_thread: HashMap<String, ThreadFollowUp>,
    #[serde(default)]
    pub last_updated: DateTime<Utc>,
}

impl ProactiveState {
    fn sends_within_window(&self, now: DateTime<Utc>) -> usize {
        self.sent_today
            .iter()
            .filter(|r| now.signed_duration_since(r.sent_at) <= Duration::hours(SEND_WINDOW_HOURS))
            .count()
    }

    fn last_send(&self) -> Option<DateTime<Utc>> {
        self.sent_today.iter().map(|r| r.sent_at).max()
    }
}

/// Drop sent records older than 24 hours
pub fn prune_sent_records(state: &mut ProactiveState, now: DateTime<Utc>) {
    let before = state.sent_today.len();
    state
        .sent_today
        .retain(|r| now.signed_duration_since(r.sent_at) <= Duration::hours(SEND_WINDOW_HOURS));
    let dropped = before - state.sent_today.len();
    if dropped > 0 {
        debug!("Pruned {} expired sent records", dropped);
    }
}

/// Rate limits and scoring thresholds
#[derive(Debug, Clone)]
pub struct ProactiveConfig {
    pub daily_limit: usize,
    pub min_gap: Duration,
    pub max_follow_ups_per_thread: u32,
    pub send_threshold: f64,
    pub note_threshold: f64,
    /// Score normally but tag results so the caller does not dispatch
    pub shadow_mode: bool,
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            daily_limit: 3,
            min_gap: Duration::hours(2),
            max_follow_ups_per_thread: 1,
            send_threshold: 7.0,
            note_threshold: 4.0,
            shadow_mode: false,
        }
    }
}

/// Why a thread was not scored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    DailyLimit,
    MinimumGap,
    ThreadLimit,
    Ignored,
}

/// Outcome of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProactiveAction {
    Send,
    Note,
    Silence,
}

impl ProactiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Note => "note",
            Self::Silence => "silence",
        }
    }
}

/// Evaluation result for one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveDecision {
    pub thread_id: String,
    pub topic: String,
    pub action: ProactiveAction,
    pub score: Option<f64>,
    pub draft: Option<String>,
    pub rate_limit_reason: Option<String>,
    pub shadow: bool,
}

impl ProactiveDecision {
    pub fn format(&self) -> String {
        let mut line = format!("{} [{}] {}", self.action.as_str(), self.thread_id, self.topic);
        if let Some(score) = self.score {
            line.push_str(&format!(" (score {:.2})", score));
        }
        if let Some(reason) = &self.rate_limit_reason {
            line.push_str(&format!(" - {}", reason));
        }
        if self.shadow {
            line.push_str(" [shadow]");
        }
        line
    }
}

/// Model judgment on a thread, sub-scores in [0, 10]
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub importance: f64,
    pub novelty: f64,
    pub timing: f64,
    pub confidence: f64,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJudgment {
    importance: f64,
    novelty: f64,
    timing: f64,
    confidence: f64,
    #[serde(default)]
    message: Option<String>,
}

impl Judgment {
    /// Weighted score rounded to 4 decimals
    pub fn weighted_score(&self) -> f64 {
        let raw = self.importance * IMPORTANCE_WEIGHT
            + self.novelty * NOVELTY_WEIGHT
            + self.timing * TIMING_WEIGHT
            + self.confidence * CONFIDENCE_WEIGHT;
        (raw * 10_000.0).round() / 10_000.0
    }
}

/// First balanced `{...}` block in `text`, skipping braces inside strings
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse a model reply into a judgment. Out-of-range scores are rejected.
pub fn parse_judgment(text: &str) -> Option<Judgment> {
    let object = extract_json_object(text)?;
    let raw: RawJudgment = match serde_json::from_str(object) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("Unparseable judgment: {}", e);
            return None;
        }
    };

    let scores = [raw.importance, raw.novelty, raw.timing, raw.confidence];
    if scores
        .iter()
        .any(|s| !s.is_finite() || *s < 0.0 || *s > SUB_SCORE_MAX)
    {
        debug!("Judgment sub-score out of range: {:?}", scores);
        return None;
    }

    Some(Judgment {
        importance: raw.importance,
        novelty: raw.novelty,
        timing: raw.timing,
        confidence: raw.confidence,
        message: raw
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
    })
}

fn build_prompt(thread: &Thread, now: DateTime<Utc>) -> String {
    let age_hours = thread.age(now).num_hours();
    let participants = if thread.participants.is_empty() {
        "unknown".to_string()
    } else {
        thread.participants.join(", ")
    };

    format!(
        "You are deciding whether to send an unprompted follow-up in a quiet conversation.\n\
         \n\
         Topic: {}\n\
         Status: {}\n\
         Last activity: {} hours ago\n\
         Participants: {}\n\
         Messages so far: {}\n\
         \n\
         Rate each from 0 to 10:\n\
         - importance: how much the user would care about resuming this\n\
         - novelty: whether there is something new worth saying\n\
         - timing: whether now is a good moment\n\
         - confidence: how sure you are in this judgment\n\
         \n\
         Reply with a single JSON object and nothing else:\n\
         {{\"importance\": 0, \"novelty\": 0, \"timing\": 0, \"confidence\": 0, \"message\": \"draft follow-up\"}}",
        thread.topic,
        thread.status.as_str(),
        age_hours,
        participants,
        thread.message_count
    )
}

fn fallback_draft(topic: &str) -> String {
    format!("Circling back on {}. Anything new on your side?", topic)
}

/// Scores dormant threads and enforces proactive rate limits
pub struct ProactiveEvaluator {
    path: PathBuf,
    state: ProactiveState,
    config: ProactiveConfig,
    backend: Arc<dyn LlmBackend>,
    threads: Arc<dyn ThreadStore>,
    clock: Arc<dyn Clock>,
}

impl ProactiveEvaluator {
    pub fn open(
        workspace: &Path,
        config: ProactiveConfig,
        backend: Arc<dyn LlmBackend>,
        threads: Arc<dyn ThreadStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut evaluator = Self {
            path: store::state_path(workspace, store::PROACTIVE_FILE),
            state: ProactiveState::default(),
            config,
            backend,
            threads,
            clock,
        };
        evaluator.load();
        evaluator
    }

    pub fn load(&mut self) {
        self.state = store::load_document(&self.path);
    }

    pub fn save(&self) -> Result<(), StoreError> {
        store::save_document(&self.path, &self.state)
    }

    pub fn state(&self) -> &ProactiveState {
        &self.state
    }

    pub fn config(&self) -> &ProactiveConfig {
        &self.config
    }

    /// First rate limit `thread_id` violates against `state`, if any
    fn check_rate_limits(
        &self,
        state: &ProactiveState,
        thread_id: &str,
        now: DateTime<Utc>,
    ) -> Option<(RateLimit, String)> {
        let sent = state.sends_within_window(now);
        if sent >= self.config.daily_limit {
            return Some((
                RateLimit::DailyLimit,
                format!(
                    "daily limit reached ({}/{} proactive sends in 24h)",
                    sent, self.config.daily_limit
                ),
            ));
        }

        if let Some(last) = state.last_send() {
            let gap = now.signed_duration_since(last);
            if gap < self.config.min_gap {
                return Some((
                    RateLimit::MinimumGap,
                    format!(
                        "minimum gap of {}m since last send not reached ({}m elapsed)",
                        self.config.min_gap.num_minutes(),
                        gap.num_minutes()
                    ),
                ));
            }
        }

        if let Some(entry) = state.follow_ups_by_thread.get(thread_id) {
            if entry.follow_up_count >= self.config.max_follow_ups_per_thread {
                return Some((
                    RateLimit::ThreadLimit,
                    format!(
                        "thread follow-up limit reached ({}/{})",
                        entry.follow_up_count, self.config.max_follow_ups_per_thread
                    ),
                ));
            }
            if entry.ignored {
                return Some((
                    RateLimit::Ignored,
                    "previous follow-up on this thread was ignored".to_string(),
                ));
            }
        }

        None
    }

    fn decision(&self, thread: &Thread, action: ProactiveAction) -> ProactiveDecision {
        ProactiveDecision {
            thread_id: thread.id.clone(),
            topic: thread.topic.clone(),
            action,
            score: None,
            draft: None,
            rate_limit_reason: None,
            shadow: self.config.shadow_mode,
        }
    }

    fn action_for_score(&self, score: f64) -> ProactiveAction {
        if score >= self.config.send_threshold {
            ProactiveAction::Send
        } else if score >= self.config.note_threshold {
            ProactiveAction::Note
        } else {
            ProactiveAction::Silence
        }
    }

    /// Ask the backend and map its judgment to an action
    async fn score_thread(&self, thread: &Thread, now: DateTime<Utc>) -> ProactiveDecision {
        let prompt = build_prompt(thread, now);

        let Some(reply) = self.backend.invoke(&prompt).await else {
            debug!("No judgment for thread {}", thread.id);
            return self.decision(thread, ProactiveAction::Silence);
        };

        let Some(judgment) = parse_judgment(&reply) else {
            warn!("Discarding unusable judgment for thread {}", thread.id);
            return self.decision(thread, ProactiveAction::Silence);
        };

        let score = judgment.weighted_score();
        let action = self.action_for_score(score);
        let mut decision = self.decision(thread, action);
        decision.score = Some(score);
        if action == ProactiveAction::Send {
            decision.draft = Some(
                judgment
                    .message
                    .unwrap_or_else(|| fallback_draft(&thread.topic)),
            );
        }

        debug!(
            "Thread {} scored {:.2} -> {}",
            thread.id,
            score,
            action.as_str()
        );
        decision
    }

    async fn evaluate_against(
        &self,
        state: &ProactiveState,
        thread: &Thread,
        now: DateTime<Utc>,
    ) -> (ProactiveDecision, Option<RateLimit>) {
        if let Some((limit, reason)) = self.check_rate_limits(state, &thread.id, now) {
            debug!("Thread {} rate limited ({:?}): {}", thread.id, limit, reason);
            let mut decision = self.decision(thread, ProactiveAction::Silence);
            decision.rate_limit_reason = Some(reason);
            return (decision, Some(limit));
        }

        (self.score_thread(thread, now).await, None)
    }

    /// Evaluate one thread. Rate limits short-circuit before any model call.
    pub async fn evaluate_thread_for_follow_up(&self, thread: &Thread) -> ProactiveDecision {
        let now = self.clock.now();
        self.evaluate_against(&self.state, thread, now).await.0
    }

    /// Evaluate every unresolved thread idle for longer than `stale_after_hours`,
    /// oldest first. Stops at the first rate-limit rejection, which is included
    /// in the results.
    pub async fn evaluate_active_threads(&self, stale_after_hours: u64) -> Vec<ProactiveDecision> {
        let now = self.clock.now();
        let stale_after = stale_threshold(stale_after_hours);

        let mut candidates: Vec<Thread> = self
            .threads
            .threads()
            .into_iter()
            .filter(|t| t.is_stale(now, stale_after))
            .collect();
        candidates.sort_by(|a, b| a.last_activity.cmp(&b.last_activity).then_with(|| a.id.cmp(&b.id)));

        // Scratch copy so a send earlier in the scan counts against later threads
        let mut scan_state = self.state.clone();
        prune_sent_records(&mut scan_state, now);

        let mut decisions = Vec::new();
        for thread in &candidates {
            let (decision, limit) = self.evaluate_against(&scan_state, thread, now).await;
            let sent = decision.action == ProactiveAction::Send && !decision.shadow;
            decisions.push(decision);

            if limit.is_some() {
                break;
            }
            if sent {
                scan_state.sent_today.push(SentRecord {
                    thread_id: thread.id.clone(),
                    sent_at: now,
                });
            }
        }

        info!(
            "Proactive scan: {} stale threads, {} evaluated",
            candidates.len(),
            decisions.len()
        );
        decisions
    }

    /// Record a dispatched follow-up
    pub fn record_follow_up_sent(&mut self, thread_id: &str, now: Option<DateTime<Utc>>) {
        let now = now.unwrap_or_else(|| self.clock.now());

        self.state.sent_today.push(SentRecord {
            thread_id: thread_id.to_string(),
            sent_at: now,
        });
        let entry = self
            .state
            .follow_ups_by_thread
            .entry(thread_id.to_string())
            .or_default();
        entry.follow_up_count += 1;
        entry.last_follow_up_at = Some(now);

        prune_sent_records(&mut self.state, now);
        self.state.last_updated = now;
        info!("Recorded follow-up sent on thread {}", thread_id);
    }

    /// Mark the thread's follow-up as ignored, creating the entry if needed
    pub fn record_follow_up_ignored(&mut self, thread_id: &str) {
        let now = self.clock.now();
        self.state
            .follow_ups_by_thread
            .entry(thread_id.to_string())
            .or_default()
            .ignored = true;
        self.state.last_updated = now;
        debug!("Thread {} follow-up marked ignored", thread_id);
    }
}
