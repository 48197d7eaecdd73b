//! Proactive Evaluator Integration Tests
//!
//! Threads come from the tracker's JSON file; the model is scripted.

use async_trait::async_trait;
use autonomy_governor::autonomous::ProactiveState;
use autonomy_governor::{
    Clock, JsonThreadStore, LlmBackend, ManualClock, ProactiveAction, ProactiveConfig,
    ProactiveEvaluator,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;

/// Replies in order, then nothing
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmBackend for ScriptedModel {
    async fn invoke(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().push(prompt.to_string());
        self.replies.lock().pop_front()
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 5, 14, 0, 0).unwrap()
}

fn write_threads(temp: &TempDir, threads: serde_json::Value) {
    let state = temp.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("threads.json"),
        serde_json::to_string_pretty(&serde_json::json!({ "threads": threads })).unwrap(),
    )
    .unwrap();
}

fn thread_json(id: &str, topic: &str, status: &str, idle_hours: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "topic": topic,
        "status": status,
        "lastActivity": (now() - Duration::hours(idle_hours)).to_rfc3339(),
        "participants": ["user"],
        "messageCount": 6,
    })
}

fn evaluator(temp: &TempDir, model: Arc<ScriptedModel>, clock: Arc<ManualClock>) -> ProactiveEvaluator {
    ProactiveEvaluator::open(
        temp.path(),
        ProactiveConfig::default(),
        model,
        Arc::new(JsonThreadStore::open(temp.path())),
        clock,
    )
}

#[tokio::test]
async fn test_send_note_boundaries_from_tracker_file() {
    let temp = TempDir::new().unwrap();
    write_threads(
        &temp,
        serde_json::json!([
            thread_json("a", "visa paperwork", "waiting", 72),
            thread_json("b", "book club", "active", 30),
        ]),
    );
    let model = ScriptedModel::new(&[
        r#"{"importance": 7, "novelty": 7, "timing": 7, "confidence": 7, "message": "Did the visa office reply?"}"#,
    ]);
    let clock = Arc::new(ManualClock::new(now()));
    let ev = evaluator(&temp, model.clone(), clock);

    let decisions = ev.evaluate_active_threads(24).await;
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].thread_id, "a");
    assert_eq!(decisions[0].action, ProactiveAction::Send);
    assert_eq!(decisions[0].score, Some(7.0));
    assert_eq!(decisions[0].draft.as_deref(), Some("Did the visa office reply?"));
    // The provisional send blocks the second thread
    assert!(decisions[1].rate_limit_reason.as_ref().unwrap().contains("minimum gap"));

    let prompts = model.prompts.lock();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("visa paperwork"));
    assert!(prompts[0].contains("72 hours"));
}

#[tokio::test]
async fn test_note_at_four() {
    let temp = TempDir::new().unwrap();
    write_threads(&temp, serde_json::json!([thread_json("a", "garden", "paused", 50)]));
    let model = ScriptedModel::new(&[r#"{"importance": 4, "novelty": 4, "timing": 4, "confidence": 4}"#]);
    let ev = evaluator(&temp, model, Arc::new(ManualClock::new(now())));

    let decisions = ev.evaluate_active_threads(48).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, ProactiveAction::Note);
    assert_eq!(decisions[0].score, Some(4.0));
    assert!(decisions[0].draft.is_none());
}

#[tokio::test]
async fn test_daily_limit_stops_scan_after_one_result() {
    let temp = TempDir::new().unwrap();
    write_threads(
        &temp,
        serde_json::json!([
            thread_json("a", "car repair", "waiting", 80),
            thread_json("b", "birthday gift", "active", 60),
        ]),
    );
    let model = ScriptedModel::new(&[]);
    let clock = Arc::new(ManualClock::new(now()));
    let mut ev = evaluator(&temp, model.clone(), clock.clone());
    for hours_ago in [9, 6, 3] {
        ev.record_follow_up_sent(&format!("old-{}", hours_ago), Some(clock.now() - Duration::hours(hours_ago)));
    }

    let decisions = ev.evaluate_active_threads(48).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, ProactiveAction::Silence);
    assert!(decisions[0].rate_limit_reason.as_ref().unwrap().contains("daily limit"));
    assert!(model.prompts.lock().is_empty());
}

#[tokio::test]
async fn test_dispatch_feedback_cycle() {
    let temp = TempDir::new().unwrap();
    write_threads(&temp, serde_json::json!([thread_json("a", "moving boxes", "waiting", 50)]));
    let clock = Arc::new(ManualClock::new(now()));

    {
        let mut ev = evaluator(&temp, ScriptedModel::new(&[]), clock.clone());
        ev.record_follow_up_sent("a", None);
        ev.record_follow_up_ignored("a");
        ev.save().unwrap();
    }

    let raw = std::fs::read_to_string(temp.path().join("state/proactive.json")).unwrap();
    let state: ProactiveState = serde_json::from_str(&raw).unwrap();
    assert_eq!(state.sent_today.len(), 1);
    assert!(state.follow_ups_by_thread["a"].ignored);

    // A day later the daily window is clear but the thread is exhausted
    clock.advance(Duration::hours(26));
    let ev = evaluator(&temp, ScriptedModel::new(&[]), clock.clone());
    let decisions = ev.evaluate_active_threads(48).await;
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0]
        .rate_limit_reason
        .as_ref()
        .unwrap()
        .contains("thread follow-up limit"));
}

#[tokio::test]
async fn test_garbage_model_output_is_silence() {
    let temp = TempDir::new().unwrap();
    write_threads(&temp, serde_json::json!([thread_json("a", "tax refund", "active", 90)]));
    let model = ScriptedModel::new(&["I would rate this a solid 8/10!"]);
    let ev = evaluator(&temp, model, Arc::new(ManualClock::new(now())));

    let decisions = ev.evaluate_active_threads(48).await;
    assert_eq!(decisions[0].action, ProactiveAction::Silence);
    assert_eq!(decisions[0].score, None);
    assert_eq!(decisions[0].rate_limit_reason, None);
}
