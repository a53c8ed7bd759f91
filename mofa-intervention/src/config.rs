//! Session configuration
//!
//! Supplied once at session construction and never mutated afterwards. Consent and
//! detector enablement live here rather than in a global toggle.

use crate::data::Millis;
use crate::error::{EngineError, EngineResult};
use serde::Deserialize;

/// Immutable configuration for one lesson session
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum interval between normal-priority interventions
    pub cooldown_ms: Millis,
    /// Capacity of the rolling emotion sample window
    pub sample_history_size: usize,
    /// Exchanges required before running out of questions completes the lesson
    pub min_exchanges_for_completion: u32,
    /// Exchange count that forces completion
    pub max_exchanges_hard_cap: u32,
    /// Silence before each nudge
    pub nudge_timeout_ms: Millis,
    /// Nudges per question, at most 2
    pub max_nudges_per_question: u8,
    pub urgent_confidence_threshold: f64,
    pub positive_confidence_threshold: f64,
    /// Expected spacing of detector samples (the detector owns the timer)
    pub sample_interval_ms: Millis,
    /// Interval of the periodic pattern re-check
    pub pattern_recheck_ms: Millis,
    /// Exchanges required before the pattern fallback may fire
    pub pattern_fallback_min_exchanges: u32,
    /// False runs the session signal-blind
    pub detector_enabled: bool,
    /// Score floor applied when the hard cap forces completion
    pub forced_completion_score_floor: u8,
    /// Score floor applied to every outcome
    pub score_floor: u8,
    /// Seed for template selection; `None` seeds from entropy
    pub template_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 15_000,
            sample_history_size: 10,
            min_exchanges_for_completion: 8,
            max_exchanges_hard_cap: 20,
            nudge_timeout_ms: 300_000,
            max_nudges_per_question: 2,
            urgent_confidence_threshold: 0.5,
            positive_confidence_threshold: 0.7,
            sample_interval_ms: 2_000,
            pattern_recheck_ms: 10_000,
            pattern_fallback_min_exchanges: 2,
            detector_enabled: true,
            forced_completion_score_floor: 85,
            score_floor: 60,
            template_seed: None,
        }
    }
}

impl SessionConfig {
    /// Reject configurations the session cannot honour
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_history_size == 0 {
            return Err(invalid("sample_history_size must be at least 1"));
        }
        if self.max_nudges_per_question > 2 {
            return Err(invalid("max_nudges_per_question must be 0, 1 or 2"));
        }
        if self.nudge_timeout_ms == 0 {
            return Err(invalid("nudge_timeout_ms must be positive"));
        }
        if self.pattern_recheck_ms == 0 {
            return Err(invalid("pattern_recheck_ms must be positive"));
        }
        if self.max_exchanges_hard_cap == 0 {
            return Err(invalid("max_exchanges_hard_cap must be positive"));
        }
        if self.min_exchanges_for_completion > self.max_exchanges_hard_cap {
            return Err(invalid(
                "min_exchanges_for_completion cannot exceed max_exchanges_hard_cap",
            ));
        }
        for (name, value) in [
            ("urgent_confidence_threshold", self.urgent_confidence_threshold),
            ("positive_confidence_threshold", self.positive_confidence_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("{} must be within [0, 1]", name)));
            }
        }
        if self.score_floor > 100 || self.forced_completion_score_floor > 100 {
            return Err(invalid("score floors must be within 0..=100"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidConfig(message.to_string())
}
