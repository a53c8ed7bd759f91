use super::InterventionPolicy;
use crate::config::SessionConfig;
use crate::cooldown::CooldownWindow;
use crate::data::{EmotionLabel, EmotionSample, InterventionCategory, InterventionDecision, Millis};
use crate::signals::{AggregateSignals, ConversationPace, EngagementLevel};

/// Which rule produced a decision, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRule {
    Busy,
    UrgentNegative,
    Celebratory,
    LowEngagement,
    Cooldown,
    Pattern,
    NoMatch,
}

/// Strict priority-ordered policy, first matching rule wins:
///
/// 1. busy speaker: hold
/// 2. confident negative emotion: urgent
/// 3. confident happiness: urgent celebration
/// 4. low engagement with a confident sample: urgent
/// 5. inside the cooldown window: hold
/// 6. struggling / confusion / low engagement / slow pace pattern: normal
/// 7. otherwise hold
#[derive(Debug, Clone)]
pub struct PriorityGatePolicy {
    cooldown_ms: Millis,
    urgent_threshold: f64,
    positive_threshold: f64,
    pattern_min_exchanges: u32,
}

impl PriorityGatePolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            cooldown_ms: config.cooldown_ms,
            urgent_threshold: config.urgent_confidence_threshold,
            positive_threshold: config.positive_confidence_threshold,
            pattern_min_exchanges: config.pattern_fallback_min_exchanges,
        }
    }

    /// Evaluate and report the rule that decided
    pub fn evaluate_with_rule(
        &self,
        sample: Option<&EmotionSample>,
        aggregate: &AggregateSignals,
        busy: bool,
        cooldown: &CooldownWindow,
        now: Millis,
        exchange_count: u32,
    ) -> (InterventionDecision, GateRule) {
        if busy {
            return (InterventionDecision::hold(), GateRule::Busy);
        }

        if let Some(sample) = sample {
            if sample.confidence > self.urgent_threshold && sample.emotion_label.is_negative() {
                return (
                    InterventionDecision::urgent(InterventionCategory::UrgentNegative),
                    GateRule::UrgentNegative,
                );
            }
            if sample.confidence > self.positive_threshold
                && sample.emotion_label == EmotionLabel::Happy
            {
                return (
                    InterventionDecision::urgent(InterventionCategory::Celebratory),
                    GateRule::Celebratory,
                );
            }
            if aggregate.engagement_level == EngagementLevel::Low
                && sample.confidence > self.urgent_threshold
            {
                return (
                    InterventionDecision::urgent(InterventionCategory::LowEngagement),
                    GateRule::LowEngagement,
                );
            }
        }

        if cooldown.is_cooling(now, self.cooldown_ms) {
            return (InterventionDecision::hold(), GateRule::Cooldown);
        }

        if exchange_count >= self.pattern_min_exchanges && Self::pattern_detected(aggregate) {
            return (
                InterventionDecision::normal(InterventionCategory::StrugglingPattern),
                GateRule::Pattern,
            );
        }

        (InterventionDecision::hold(), GateRule::NoMatch)
    }

    fn pattern_detected(aggregate: &AggregateSignals) -> bool {
        aggregate.is_struggling
            || aggregate.needs_simplification
            || aggregate.engagement_level == EngagementLevel::Low
            || aggregate.conversation_pace == ConversationPace::Slow
    }
}

impl InterventionPolicy for PriorityGatePolicy {
    fn evaluate(
        &self,
        sample: &EmotionSample,
        aggregate: &AggregateSignals,
        busy: bool,
        cooldown: &CooldownWindow,
        now: Millis,
        exchange_count: u32,
    ) -> InterventionDecision {
        self.evaluate_with_rule(Some(sample), aggregate, busy, cooldown, now, exchange_count)
            .0
    }

    fn evaluate_periodic(
        &self,
        aggregate: &AggregateSignals,
        busy: bool,
        cooldown: &CooldownWindow,
        now: Millis,
        exchange_count: u32,
    ) -> InterventionDecision {
        self.evaluate_with_rule(None, aggregate, busy, cooldown, now, exchange_count)
            .0
    }

    fn name(&self) -> &str {
        "priority-gate"
    }
}
