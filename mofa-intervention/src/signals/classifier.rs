//! Struggling / engagement classifier
//!
//! Pure functions over a sample window and the measured dialogue-turn gaps. Nothing
//! here holds state between calls, so the aggregate can never lag the history it was
//! computed from.

use crate::data::{EmotionSample, Millis};
use serde::Serialize;

/// Samples considered for engagement and struggling
pub const ENGAGEMENT_WINDOW: usize = 5;
/// Samples considered for the confusion signal
pub const CONFUSION_WINDOW: usize = 3;

const HIGH_ENGAGEMENT_RATIO: f64 = 0.7;
const MEDIUM_ENGAGEMENT_RATIO: f64 = 0.4;
const STRUGGLING_MIN_HITS: usize = 3;
const CONFUSION_MIN_HITS: usize = 2;
const FAST_PACE_MS: f64 = 3_000.0;
const SLOW_PACE_MS: f64 = 15_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationPace {
    Slow,
    Normal,
    Fast,
}

/// Aggregate view of the recent signal window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateSignals {
    pub engagement_level: EngagementLevel,
    pub is_struggling: bool,
    pub needs_simplification: bool,
    pub conversation_pace: ConversationPace,
    pub look_away_count: usize,
    pub emotion_change_count: usize,
}

impl Default for AggregateSignals {
    fn default() -> Self {
        compute(&[], &[])
    }
}

/// Compute aggregate signals from `samples` (oldest first) and `turn_gaps_ms`
/// (question dispatched to response accepted, one entry per exchange).
pub fn compute(samples: &[EmotionSample], turn_gaps_ms: &[Millis]) -> AggregateSignals {
    let recent = tail(samples, ENGAGEMENT_WINDOW);

    AggregateSignals {
        engagement_level: engagement_level(recent),
        is_struggling: recent
            .iter()
            .filter(|s| s.emotion_label.is_negative() || !s.is_gaze_on_screen)
            .count()
            >= STRUGGLING_MIN_HITS,
        needs_simplification: tail(samples, CONFUSION_WINDOW)
            .iter()
            .filter(|s| s.emotion_label.is_confused())
            .count()
            >= CONFUSION_MIN_HITS,
        conversation_pace: conversation_pace(turn_gaps_ms),
        look_away_count: samples.iter().filter(|s| !s.is_gaze_on_screen).count(),
        emotion_change_count: samples
            .windows(2)
            .filter(|pair| pair[0].emotion_label != pair[1].emotion_label)
            .count(),
    }
}

fn tail(samples: &[EmotionSample], n: usize) -> &[EmotionSample] {
    &samples[samples.len().saturating_sub(n)..]
}

fn engagement_level(recent: &[EmotionSample]) -> EngagementLevel {
    // No evidence of looking away yet
    if recent.is_empty() {
        return EngagementLevel::High;
    }
    let on_screen = recent.iter().filter(|s| s.is_gaze_on_screen).count();
    let ratio = on_screen as f64 / recent.len() as f64;
    if ratio >= HIGH_ENGAGEMENT_RATIO {
        EngagementLevel::High
    } else if ratio >= MEDIUM_ENGAGEMENT_RATIO {
        EngagementLevel::Medium
    } else {
        EngagementLevel::Low
    }
}

fn conversation_pace(turn_gaps_ms: &[Millis]) -> ConversationPace {
    if turn_gaps_ms.is_empty() {
        return ConversationPace::Normal;
    }
    let average = turn_gaps_ms.iter().map(|&g| g as f64).sum::<f64>() / turn_gaps_ms.len() as f64;
    if average < FAST_PACE_MS {
        ConversationPace::Fast
    } else if average > SLOW_PACE_MS {
        ConversationPace::Slow
    } else {
        ConversationPace::Normal
    }
}
