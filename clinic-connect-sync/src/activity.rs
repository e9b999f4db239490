//! Activity Tracker
//!
//! Records when the user last interacted with a conversation (sending,
//! typing in the composer, selecting the conversation). The mode selector
//! reads the timestamp lazily at the start of each cycle.

use crate::clock::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Last-activity timestamp shared between the UI side and the poll task
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    clock: Arc<dyn Clock>,
    last_activity: Arc<AtomicI64>,
}

impl ActivityTracker {
    /// Create a tracker. Creation counts as activity.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            clock,
            last_activity: Arc::new(AtomicI64::new(now)),
        }
    }

    /// Record activity at the current clock time
    pub fn mark_activity(&self) {
        self.last_activity
            .store(self.clock.now_millis(), Ordering::SeqCst);
    }

    /// Timestamp of the last recorded activity (ms)
    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Milliseconds since the last activity, never negative
    pub fn elapsed_millis(&self) -> u64 {
        let elapsed = self.clock.now_millis() - self.last_activity();
        elapsed.max(0) as u64
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_mark_activity() {
        let clock = ManualClock::new(1_000);
        let tracker = ActivityTracker::new(Arc::new(clock.clone()));
        assert_eq!(tracker.last_activity(), 1_000);

        clock.advance(2_500);
        assert_eq!(tracker.elapsed_millis(), 2_500);

        tracker.mark_activity();
        assert_eq!(tracker.last_activity(), 3_500);
        assert_eq!(tracker.elapsed_millis(), 0);
    }

    #[test]
    fn test_clock_going_backwards_clamps_to_zero() {
        let clock = ManualClock::new(1_000);
        let tracker = ActivityTracker::new(Arc::new(clock.clone()));
        clock.set(500);
        assert_eq!(tracker.elapsed_millis(), 0);
    }
}
