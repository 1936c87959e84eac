//! Command-driven pacing

use std::time::Duration;

/// Converts consecutive command timestamps into a bounded suspension
///
/// The delay is the gap between the current and the previous command's
/// logical timestamp, clamped to `[0, max_delay]`. There is no delay for the
/// first command or for a stamp that does not move forward.
#[derive(Debug, Clone)]
pub struct CommandPacer {
    previous: Option<f64>,
    max_delay: Duration,
}

impl CommandPacer {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            previous: None,
            max_delay,
        }
    }

    /// Delay owed before returning from the command stamped `stamp`
    pub fn delay_for(&self, stamp: f64) -> Duration {
        let Some(previous) = self.previous else {
            return Duration::ZERO;
        };
        let gap = stamp - previous;
        if !gap.is_finite() || gap <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(gap).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Record `stamp` as the previous timestamp
    ///
    /// Called once the suspension for `stamp` has elapsed.
    pub fn commit(&mut self, stamp: f64) {
        self.previous = Some(stamp);
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
