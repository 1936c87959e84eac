//! When physics steps and state is published

use std::time::Duration;

use crate::sim::{SimConfig, TimingMode};

/// Step/publish strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// A fixed-period timer steps and publishes; commands only update the
    /// last command
    TimerDriven { period: Duration },
    /// Every accepted command steps and publishes, then waits out the gap to
    /// the previous command's timestamp (at most `max_delay`)
    CommandDriven { max_delay: Duration },
}

impl StepPolicy {
    pub fn from_config(config: &SimConfig) -> Self {
        match config.timing {
            TimingMode::Timer => Self::TimerDriven {
                period: config.timestep(),
            },
            TimingMode::Command => Self::CommandDriven {
                max_delay: config.pacing.max_delay(),
            },
        }
    }

    /// Whether a timer tick steps physics
    pub fn steps_on_tick(&self) -> bool {
        matches!(self, Self::TimerDriven { .. })
    }

    /// Whether an accepted command steps physics
    pub fn steps_on_command(&self) -> bool {
        matches!(self, Self::CommandDriven { .. })
    }

    /// Timer period, if timer-driven
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::TimerDriven { period } => Some(*period),
            Self::CommandDriven { .. } => None,
        }
    }
}
