//! Control: torque law, last-command cell, pacing and the control loop
//!
//! [`pd_feedforward_torque`] is the only torque computation in the crate.
//! [`ControlLoop`] applies it through the backend under one of two
//! [`StepPolicy`] variants.

mod control_loop;
mod last_command;
mod law;
mod pacing;
mod policy;
mod timer;

pub use control_loop::{ControlLoop, LoopState, LoopStats};
pub use last_command::LastCommand;
pub use law::pd_feedforward_torque;
pub use pacing::CommandPacer;
pub use policy::StepPolicy;
pub use timer::{Timer, TimerConfig, TimerHandle, TimerStats};
