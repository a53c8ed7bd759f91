// Policy module for the intervention engine
// This module defines the trait for intervention policies and the shipped implementation

pub mod priority_gate;

pub use priority_gate::{GateRule, PriorityGatePolicy};

use crate::cooldown::CooldownWindow;
use crate::data::{EmotionSample, InterventionDecision, Millis};
use crate::signals::AggregateSignals;

/// Core trait that defines the interface for intervention policies
///
/// Implementations decide whether the engine should speak up outside the normal
/// question/answer turn. They are pure: the caller owns the cooldown window and
/// resets it when a decision to intervene is acted on.
pub trait InterventionPolicy: Send + Sync {
    /// Evaluate a freshly arrived sample
    ///
    /// The triggering sample is passed directly; implementations must not consult
    /// any other notion of "current emotion".
    fn evaluate(
        &self,
        sample: &EmotionSample,
        aggregate: &AggregateSignals,
        busy: bool,
        cooldown: &CooldownWindow,
        now: Millis,
        exchange_count: u32,
    ) -> InterventionDecision;

    /// Evaluate on the periodic re-check, when no new sample triggered the call
    ///
    /// Subject to the same busy and cooldown gates as [`InterventionPolicy::evaluate`].
    fn evaluate_periodic(
        &self,
        aggregate: &AggregateSignals,
        busy: bool,
        cooldown: &CooldownWindow,
        now: Millis,
        exchange_count: u32,
    ) -> InterventionDecision;

    /// Policy name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    mod priority_gate_test;
}
