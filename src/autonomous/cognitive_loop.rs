//! Cognitive Loop
//!
//! Self-initiated reflection scheduler. On every tick the loop rebuilds the
//! attention snapshot and invokes the think callback when:
//! - urgency crosses the threshold, or
//! - the maximum interval since the last reflection has elapsed,
//!
//! but never more often than the minimum interval. The callback runs to
//! completion inside the tick, so the loop never overlaps invocations.
//! `stop()` during an in-flight callback lets it finish and prevents any
//! further scheduling.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::attention::{compute_urgency_score, parse_concerns, AttentionState, TimeContext};
use crate::clock::Clock;

/// Caller-supplied reflection. Receives the reason the loop fired.
pub type ThinkCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// External inputs for the attention snapshot
pub trait AttentionSource: Send + Sync {
    /// Markdown bullet list of concerns
    fn concerns_document(&self) -> String;
    /// Actions waiting for approval
    fn pending_actions(&self) -> usize;
    /// Whether any tracked thread has gone stale
    fn has_stale_threads(&self) -> bool;
}

/// Configuration for the cognitive loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// How often attention is re-evaluated
    pub tick_interval: Duration,
    /// Never reflect more often than this
    pub min_interval: Duration,
    /// Always reflect at least this often
    pub max_interval: Duration,
    /// Urgency at or above which the loop reflects
    pub urgency_threshold: f64,
    /// Offset used to derive the local hour of day
    pub utc_offset: FixedOffset,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(600),   // 10 minutes
            max_interval: Duration::from_secs(14400), // 4 hours
            urgency_threshold: 0.6,
            utc_offset: Utc.fix(),
        }
    }
}

/// Loop run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Stopped,
    Running,
}

#[derive(Debug)]
struct Timing {
    created_at: DateTime<Utc>,
    last_reflection: Option<DateTime<Utc>>,
    last_user_message: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LoopStats {
    ticks: AtomicU64,
    reflections: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of loop statistics
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatsSnapshot {
    pub state: LoopState,
    pub ticks: u64,
    pub reflections: u64,
    pub failures: u64,
    pub last_reason: Option<String>,
    pub last_reflection: Option<DateTime<Utc>>,
}

struct LoopInner {
    config: LoopConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn AttentionSource>,
    think: ThinkCallback,
    timing: Mutex<Timing>,
    last_reason: Mutex<Option<String>>,
    in_flight: AtomicBool,
    stats: LoopStats,
}

struct Control {
    state: LoopState,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Urgency-driven reflection scheduler
pub struct CognitiveLoop {
    inner: Arc<LoopInner>,
    control: Mutex<Control>,
}

fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

impl CognitiveLoop {
    pub fn new(
        config: LoopConfig,
        clock: Arc<dyn Clock>,
        source: Arc<dyn AttentionSource>,
        think: ThinkCallback,
    ) -> Self {
        let created_at = clock.now();
        Self {
            inner: Arc::new(LoopInner {
                config,
                clock,
                source,
                think,
                timing: Mutex::new(Timing {
                    created_at,
                    last_reflection: None,
                    last_user_message: None,
                }),
                last_reason: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                stats: LoopStats::default(),
            }),
            control: Mutex::new(Control {
                state: LoopState::Stopped,
                shutdown: None,
                handle: None,
            }),
        }
    }

    /// Begin ticking on the current tokio runtime. A second call is a no-op.
    pub fn start(&self) {
        let mut control = self.control.lock();
        if control.state == LoopState::Running {
            warn!("Cognitive loop already running, ignoring start");
            return;
        }

        let (tx, rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        control.handle = Some(tokio::spawn(inner.run(rx)));
        control.shutdown = Some(tx);
        control.state = LoopState::Running;

        info!(
            "Cognitive loop started (tick {:?}, threshold {:.2})",
            self.inner.config.tick_interval, self.inner.config.urgency_threshold
        );
    }

    /// Stop scheduling. An in-flight think callback is allowed to finish.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        if control.state == LoopState::Stopped {
            debug!("Cognitive loop already stopped");
            return;
        }

        if let Some(tx) = control.shutdown.take() {
            let _ = tx.send(true);
        }
        // Detach rather than abort so the current callback completes
        control.handle.take();
        control.state = LoopState::Stopped;

        info!("Cognitive loop stopped");
    }

    pub fn state(&self) -> LoopState {
        self.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Running
    }

    /// Reset the "time since last user message" signal
    pub fn record_user_message(&self) {
        self.inner.timing.lock().last_user_message = Some(self.inner.clock.now());
    }

    /// Build the attention snapshot for the current instant
    pub fn evaluate_attention(&self) -> AttentionState {
        self.inner.evaluate_attention(self.inner.clock.now())
    }

    /// Whether `state` alone is urgent enough to reflect
    pub fn should_think(&self, state: &AttentionState) -> bool {
        state.urgency_score >= self.inner.config.urgency_threshold
    }

    /// Run one evaluation cycle. Returns the reason if the callback fired.
    pub async fn tick(&self) -> Option<String> {
        self.inner.tick().await
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        let stats = &self.inner.stats;
        LoopStatsSnapshot {
            state: self.state(),
            ticks: stats.ticks.load(Ordering::Relaxed),
            reflections: stats.reflections.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            last_reason: self.inner.last_reason.lock().clone(),
            last_reflection: self.inner.timing.lock().last_reflection,
        }
    }
}

impl Drop for CognitiveLoop {
    fn drop(&mut self) {
        let control = self.control.get_mut();
        if let Some(tx) = control.shutdown.take() {
            let _ = tx.send(true);
        }
    }
}

impl LoopInner {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Cognitive loop task exited");
    }

    fn evaluate_attention(&self, now: DateTime<Utc>) -> AttentionState {
        let (since_reflection, since_user) = {
            let timing = self.timing.lock();
            let baseline = timing.last_reflection.unwrap_or(timing.created_at);
            (
                elapsed(now, baseline),
                timing.last_user_message.map(|t| elapsed(now, t)),
            )
        };

        let concerns = parse_concerns(&self.source.concerns_document());
        let pending = self.source.pending_actions();
        let stale = self.source.has_stale_threads();

        let hour = now.with_timezone(&self.config.utc_offset).hour();
        let time_context = TimeContext::new(hour, since_user);

        let urgency_score = compute_urgency_score(
            &concerns,
            pending,
            since_reflection,
            self.config.max_interval,
            stale,
            Some(&time_context),
        );

        AttentionState {
            concerns,
            time_since_last_reflection: since_reflection,
            time_since_last_user_message: since_user,
            pending_actions_count: pending,
            has_stale_threads: stale,
            urgency_score,
            time_context,
        }
    }

    fn decide(&self, state: &AttentionState, now: DateTime<Utc>) -> Option<String> {
        if let Some(last) = self.timing.lock().last_reflection {
            if elapsed(now, last) < self.config.min_interval {
                return None;
            }
        }

        if state.urgency_score >= self.config.urgency_threshold {
            Some(format!(
                "urgency {:.2} >= {:.2} ({})",
                state.urgency_score,
                self.config.urgency_threshold,
                state.describe()
            ))
        } else if state.time_since_last_reflection >= self.config.max_interval {
            Some(format!(
                "max interval of {}m elapsed ({})",
                self.config.max_interval.as_secs() / 60,
                state.describe()
            ))
        } else {
            None
        }
    }

    async fn tick(&self) -> Option<String> {
        let now = self.clock.now();
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let state = self.evaluate_attention(now);
        let reason = self.decide(&state, now)?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Think already in flight, skipping tick");
            return None;
        }

        self.timing.lock().last_reflection = Some(now);
        *self.last_reason.lock() = Some(reason.clone());
        self.stats.reflections.fetch_add(1, Ordering::Relaxed);

        info!("Thinking: {}", reason);
        let result = (self.think)(reason.clone()).await;
        self.in_flight.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!("Think callback failed: {:#}", e);
        }

        Some(reason)
    }
}
