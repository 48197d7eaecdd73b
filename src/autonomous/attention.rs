//! Attention & Urgency
//!
//! Builds the per-tick attention snapshot and scores how urgently the agent
//! should reflect. The score is additive and clamped to [0, 1]:
//!
//! | signal                         | contribution                     |
//! |--------------------------------|----------------------------------|
//! | active concerns                | 0.15 × min(n, 3)                 |
//! | pending actions                | 0.20 × min(n, 2)                 |
//! | time since last reflection     | 0.15 × min(elapsed / max, 1)     |
//! | stale threads present          | +0.10                            |
//! | morning, >6h since reflection  | +0.15                            |
//! | evening, >4h since reflection  | +0.10                            |
//! | quiet period                   | +0.10                            |
//! | night                          | −0.15                            |

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

const CONCERN_WEIGHT: f64 = 0.15;
const CONCERN_CAP: usize = 3;
const PENDING_WEIGHT: f64 = 0.2;
const PENDING_CAP: usize = 2;
const TIME_PRESSURE_WEIGHT: f64 = 0.15;
const STALE_THREAD_BONUS: f64 = 0.10;
const MORNING_BONUS: f64 = 0.15;
const EVENING_BONUS: f64 = 0.10;
const QUIET_BONUS: f64 = 0.10;
const NIGHT_PENALTY: f64 = 0.15;

/// No user message for this long counts as a quiet period
pub const QUIET_AFTER: Duration = Duration::from_secs(4 * 3600);

/// Whether a concern needs attention now or is just being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcernPriority {
    Active,
    Radar,
}

/// One bullet from the concerns document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub text: String,
    pub priority: ConcernPriority,
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").expect("valid heading regex")
});

static RE_BULLET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[-*+]\s+(?:\[[ xX]\]\s+)?(.+?)\s*$").expect("valid bullet regex")
});

/// Extract concerns from a markdown bullet list.
///
/// A heading starting with "Active" scopes following bullets as active, one
/// starting with "On my radar" as radar. Bullets before any heading are active. Other headings
/// leave the current scope unchanged.
pub fn parse_concerns(document: &str) -> Vec<Concern> {
    let mut priority = ConcernPriority::Active;
    let mut concerns = Vec::new();

    for line in document.lines() {
        if let Some(caps) = RE_HEADING.captures(line) {
            let heading = caps[1].to_lowercase();
            if heading.starts_with("on my radar") {
                priority = ConcernPriority::Radar;
            } else if heading.starts_with("active") {
                priority = ConcernPriority::Active;
            }
            continue;
        }

        if let Some(caps) = RE_BULLET.captures(line) {
            let text = caps[1].trim();
            if !text.is_empty() {
                concerns.push(Concern {
                    text: text.to_string(),
                    priority,
                });
            }
        }
    }

    concerns
}

/// Coarse part of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Morning,
    Daytime,
    Evening,
    Night,
}

impl TimePeriod {
    /// 6–9 morning, 10–17 daytime, 18–22 evening, 23–5 night
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=9 => Self::Morning,
            10..=17 => Self::Daytime,
            18..=22 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Daytime => "daytime",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Time-of-day rhythm inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeContext {
    pub period: TimePeriod,
    pub is_quiet_period: bool,
    pub hour_of_day: u32,
}

impl TimeContext {
    /// `since_user_message` is `None` when the user has never written,
    /// which counts as quiet.
    pub fn new(hour_of_day: u32, since_user_message: Option<Duration>) -> Self {
        let hour_of_day = hour_of_day % 24;
        Self {
            period: TimePeriod::from_hour(hour_of_day),
            is_quiet_period: since_user_message.map(|d| d > QUIET_AFTER).unwrap_or(true),
            hour_of_day,
        }
    }
}

/// Snapshot built on every loop tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionState {
    pub concerns: Vec<Concern>,
    pub time_since_last_reflection: Duration,
    pub time_since_last_user_message: Option<Duration>,
    pub pending_actions_count: usize,
    pub has_stale_threads: bool,
    pub urgency_score: f64,
    pub time_context: TimeContext,
}

impl AttentionState {
    pub fn active_concerns(&self) -> usize {
        self.concerns
            .iter()
            .filter(|c| c.priority == ConcernPriority::Active)
            .count()
    }

    /// Short description used as part of the think reason
    pub fn describe(&self) -> String {
        format!(
            "{} active concerns, {} pending actions, {}m since reflection, {}{}",
            self.active_concerns(),
            self.pending_actions_count,
            self.time_since_last_reflection.as_secs() / 60,
            self.time_context.period.as_str(),
            if self.has_stale_threads { ", stale threads" } else { "" }
        )
    }
}

/// Additive urgency score in [0, 1].
///
/// Rhythm terms only apply when a `time` context is given.
pub fn compute_urgency_score(
    concerns: &[Concern],
    pending_actions: usize,
    since_reflection: Duration,
    max_interval: Duration,
    has_stale_threads: bool,
    time: Option<&TimeContext>,
) -> f64 {
    let active = concerns
        .iter()
        .filter(|c| c.priority == ConcernPriority::Active)
        .count();

    let mut score = CONCERN_WEIGHT * active.min(CONCERN_CAP) as f64;
    score += PENDING_WEIGHT * pending_actions.min(PENDING_CAP) as f64;

    if !max_interval.is_zero() {
        let pressure = since_reflection.as_secs_f64() / max_interval.as_secs_f64();
        score += TIME_PRESSURE_WEIGHT * pressure.min(1.0);
    }

    if has_stale_threads {
        score += STALE_THREAD_BONUS;
    }

    if let Some(time) = time {
        match time.period {
            TimePeriod::Morning if since_reflection > 6 * HOUR => score += MORNING_BONUS,
            TimePeriod::Evening if since_reflection > 4 * HOUR => score += EVENING_BONUS,
            TimePeriod::Night => score -= NIGHT_PENALTY,
            _ => {}
        }
        if time.is_quiet_period {
            score += QUIET_BONUS;
        }
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(n: usize) -> Vec<Concern> {
        (0..n)
            .map(|i| Concern {
                text: format!("concern {}", i),
                priority: ConcernPriority::Active,
            })
            .collect()
    }

    const FIFTEEN_MIN: Duration = Duration::from_secs(900);

    #[test]
    fn test_empty_inputs_score_zero() {
        assert_eq!(
            compute_urgency_score(&[], 0, Duration::ZERO, FIFTEEN_MIN, false, None),
            0.0
        );
    }

    #[test]
    fn test_concerns_are_capped() {
        let three = compute_urgency_score(&active(3), 0, Duration::ZERO, FIFTEEN_MIN, false, None);
        let five = compute_urgency_score(&active(5), 0, Duration::ZERO, FIFTEEN_MIN, false, None);
        assert!((three - 0.45).abs() < 1e-9);
        assert_eq!(three, five);
    }

    #[test]
    fn test_radar_concerns_ignored() {
        let radar = vec![Concern {
            text: "watch rent".to_string(),
            priority: ConcernPriority::Radar,
        }];
        assert_eq!(
            compute_urgency_score(&radar, 0, Duration::ZERO, FIFTEEN_MIN, false, None),
            0.0
        );
    }

    #[test]
    fn test_all_signals_clamp_to_one() {
        let score = compute_urgency_score(&active(3), 2, FIFTEEN_MIN, FIFTEEN_MIN, true, None);
        assert_eq!(score, 1.0);

        let morning = TimeContext::new(7, None);
        let maxed = compute_urgency_score(&active(4), 5, 10 * HOUR, FIFTEEN_MIN, true, Some(&morning));
        assert_eq!(maxed, 1.0);
    }

    #[test]
    fn test_time_pressure_is_proportional() {
        let half = compute_urgency_score(&[], 0, Duration::from_secs(450), FIFTEEN_MIN, false, None);
        assert!((half - 0.075).abs() < 1e-9);
        let over = compute_urgency_score(&[], 0, 3 * FIFTEEN_MIN, FIFTEEN_MIN, false, None);
        assert!((over - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_rhythm_terms() {
        let busy = Some(Duration::from_secs(60));
        let morning = TimeContext::new(8, busy);
        let evening = TimeContext::new(20, busy);
        let night = TimeContext::new(2, busy);
        let day = TimeContext::new(13, busy);

        let long = 7 * HOUR;
        let max = 24 * HOUR;
        let base = TIME_PRESSURE_WEIGHT * (7.0 / 24.0);

        let m = compute_urgency_score(&[], 0, long, max, false, Some(&morning));
        assert!((m - (base + 0.15)).abs() < 1e-9);

        let e = compute_urgency_score(&[], 0, long, max, false, Some(&evening));
        assert!((e - (base + 0.10)).abs() < 1e-9);

        let d = compute_urgency_score(&[], 0, long, max, false, Some(&day));
        assert!((d - base).abs() < 1e-9);

        let n = compute_urgency_score(&active(1), 0, long, max, false, Some(&night));
        assert!((n - (0.15 + base - 0.15)).abs() < 1e-9);

        // Morning bonus needs more than six hours without reflection
        let short = compute_urgency_score(&[], 0, 2 * HOUR, max, false, Some(&morning));
        assert!(short < 0.05);
    }

    #[test]
    fn test_night_never_goes_negative() {
        let night = TimeContext::new(3, Some(Duration::from_secs(10)));
        assert_eq!(
            compute_urgency_score(&[], 0, Duration::ZERO, FIFTEEN_MIN, false, Some(&night)),
            0.0
        );
    }

    #[test]
    fn test_time_context_periods() {
        assert_eq!(TimeContext::new(6, None).period, TimePeriod::Morning);
        assert_eq!(TimeContext::new(9, None).period, TimePeriod::Morning);
        assert_eq!(TimeContext::new(10, None).period, TimePeriod::Daytime);
        assert_eq!(TimeContext::new(17, None).period, TimePeriod::Daytime);
        assert_eq!(TimeContext::new(18, None).period, TimePeriod::Evening);
        assert_eq!(TimeContext::new(22, None).period, TimePeriod::Evening);
        assert_eq!(TimeContext::new(23, None).period, TimePeriod::Night);
        assert_eq!(TimeContext::new(0, None).period, TimePeriod::Night);
        assert_eq!(TimeContext::new(5, None).period, TimePeriod::Night);
    }

    #[test]
    fn test_quiet_period() {
        assert!(TimeContext::new(12, None).is_quiet_period);
        assert!(TimeContext::new(12, Some(5 * HOUR)).is_quiet_period);
        assert!(!TimeContext::new(12, Some(4 * HOUR)).is_quiet_period);
        assert!(!TimeContext::new(12, Some(Duration::from_secs(30))).is_quiet_period);
    }

    #[test]
    fn test_parse_concerns_with_headings() {
        let doc = "\
- loose item before headings

## Active
- finish tax forms
* [ ] call the landlord

## On my radar
- passport renewal next year
+ [x] check insurance

## Active
- reply to Dana
";
        let concerns = parse_concerns(doc);
        let summary: Vec<(&str, ConcernPriority)> =
            concerns.iter().map(|c| (c.text.as_str(), c.priority)).collect();

        assert_eq!(
            summary,
            vec![
                ("loose item before headings", ConcernPriority::Active),
                ("finish tax forms", ConcernPriority::Active),
                ("call the landlord", ConcernPriority::Active),
                ("passport renewal next year", ConcernPriority::Radar),
                ("check insurance", ConcernPriority::Radar),
                ("reply to Dana", ConcernPriority::Active),
            ]
        );
    }

    #[test]
    fn test_parse_concerns_ignores_prose_and_empty_bullets() {
        let doc = "Some notes here.\n-   \n- real one\nnot a bullet - still not\n";
        let concerns = parse_concerns(doc);
        assert_eq!(concerns.len(), 1);
        assert_eq!(concerns[0].text, "real one");
    }

    #[test]
    fn test_unrecognised_heading_keeps_scope() {
        let doc = "# On my radar\n- a\n### Misc\n- b\n";
        let concerns = parse_concerns(doc);
        assert!(concerns.iter().all(|c| c.priority == ConcernPriority::Radar));
    }

    #[test]
    fn test_heading_must_start_with_scope_name() {
        let doc = "## On my radar\n- a\n## Inactive\n- b\n## Not active anymore\n- c\n## Active concerns\n- d\n";
        let concerns = parse_concerns(doc);
        let priorities: Vec<_> = concerns.iter().map(|c| c.priority).collect();
        assert_eq!(
            priorities,
            vec![
                ConcernPriority::Radar,
                ConcernPriority::Radar,
                ConcernPriority::Radar,
                ConcernPriority::Active,
            ]
        );
    }
}
