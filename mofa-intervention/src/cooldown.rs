//! Cooldown window between interventions

use crate::data::Millis;

/// Tracks when the last intervention was spoken.
///
/// A window that has never been reset reports an unbounded elapsed time, so the
/// first normal-priority intervention of a session is never held back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownWindow {
    last_intervention_at: Option<Millis>,
}

impl CooldownWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A window last reset at `at`
    pub fn reset_at(at: Millis) -> Self {
        Self {
            last_intervention_at: Some(at),
        }
    }

    /// Milliseconds since the last reset; saturates when `now` is behind the reset
    pub fn elapsed(&self, now: Millis) -> Millis {
        match self.last_intervention_at {
            Some(at) => now.saturating_sub(at),
            None => Millis::MAX,
        }
    }

    pub fn reset(&mut self, now: Millis) {
        self.last_intervention_at = Some(now);
    }

    pub fn last_intervention_at(&self) -> Option<Millis> {
        self.last_intervention_at
    }

    /// True while fewer than `cooldown_ms` have passed since the last reset
    pub fn is_cooling(&self, now: Millis, cooldown_ms: Millis) -> bool {
        self.elapsed(now) < cooldown_ms
    }
}
