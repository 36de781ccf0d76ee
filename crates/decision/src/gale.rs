use common::{GaleState, Outcome};
use tracing::info;

/// Hard cap on gale attempts. Compiled-in constant — not user-configurable —
/// so a losing streak can never escalate indefinitely.
pub const MAX_GALE_ATTEMPTS: u8 = 2;

/// Bounded retry counter fed by trade outcomes.
///
/// A loss increments the counter and arms the continuation flag for
/// downstream consumers; a win, or a loss while already at the cap, resets
/// everything. Pure bookkeeping: it never alters signal content.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaleTracker {
    state: GaleState,
}

impl GaleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GaleState {
        self.state
    }

    /// Apply one trade outcome and return the resulting state.
    pub fn record(&mut self, outcome: Outcome) -> GaleState {
        let before = self.state;
        self.state = match outcome {
            Outcome::Win => GaleState::default(),
            Outcome::Loss if before.attempts >= MAX_GALE_ATTEMPTS => GaleState::default(),
            Outcome::Loss => GaleState {
                attempts: before.attempts + 1,
                armed: true,
            },
        };
        info!(
            outcome = %outcome,
            attempts = self.state.attempts,
            armed = self.state.armed,
            "Gale state updated"
        );
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn losses_climb_to_the_cap_then_reset() {
        let mut tracker = GaleTracker::new();
        assert_eq!(tracker.record(Outcome::Loss).attempts, 1);
        assert_eq!(tracker.record(Outcome::Loss).attempts, 2);
        // Third consecutive loss resets rather than exceeding the cap
        let state = tracker.record(Outcome::Loss);
        assert_eq!(state.attempts, 0);
        assert!(!state.armed);
    }

    #[test]
    fn a_win_resets_at_any_level() {
        let mut tracker = GaleTracker::new();
        tracker.record(Outcome::Loss);
        tracker.record(Outcome::Loss);
        let state = tracker.record(Outcome::Win);
        assert_eq!(state, GaleState::default());
    }

    #[test]
    fn a_win_from_idle_stays_idle() {
        let mut tracker = GaleTracker::new();
        assert_eq!(tracker.record(Outcome::Win), GaleState::default());
    }

    #[test]
    fn losses_arm_the_continuation_flag() {
        let mut tracker = GaleTracker::new();
        assert!(tracker.record(Outcome::Loss).armed);
        assert!(tracker.record(Outcome::Loss).armed);
    }
}
