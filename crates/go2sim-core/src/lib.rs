//! go2sim-core: joint-level simulation bridge for the Unitree Go2
//!
//! Accepts low-level joint commands (target position, target velocity,
//! feed-forward torque and gains for each of the 12 leg joints), turns them
//! into actuator torques with a PD + feed-forward law, advances a physics
//! backend by one timestep and publishes the resulting joint and base state.
//!
//! # Modules
//!
//! - [`robot`] - Canonical joint order, joint map and the state/command data model
//! - [`msg`] - Bus-facing `LowCmd`/`LowState` messages
//! - [`comm`] - Channels and topics standing in for the message bus
//! - [`sim`] - Physics backend abstraction (engine and dynamics variants)
//! - [`control`] - Torque law, last-command cell, pacing and the control loop
//! - [`bridge`] - Bridge node owning the timer and the command subscription
//!
//! # Architecture
//!
//! ```text
//!  /lowcmd ──► BridgeNode ──► ControlLoop.apply_cmd ──► PhysicsBackend.execute_step
//!                  │                    │                         │
//!               timer tick ─────────────┘                  get_state
//!                                                               │
//!  /lowstate ◄──────────── build_state_message ◄────────────────┘
//! ```

#![warn(unused_must_use)]

pub mod bridge;
pub mod comm;
pub mod control;
pub mod math;
pub mod msg;
pub mod robot;
pub mod sim;

// Re-exports for convenience
pub use bridge::{BridgeHandle, BridgeNode};
pub use comm::{MessageSink, Receiver, Sender, Topic, TopicConfig};
pub use control::{pd_feedforward_torque, ControlLoop, LoopState, LoopStats, StepPolicy};
pub use math::Quaternion;
pub use msg::{ImuState, LowCmdMsg, LowState, MotorCmd, MotorState};
pub use robot::{
    BaseState, JointCommand, JointHandle, JointInfo, JointMap, JointState, JointTargets, LowCmd,
    RobotState, JOINT_NAMES, NUM_JOINTS,
};
pub use sim::{
    BackendKind, DynamicsBackend, EngineBackend, MockDynamics, MockEngine, PhysicsBackend,
    SimConfig, TimingMode,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for go2sim-core
///
/// Startup failures ([`Error::JointResolution`], [`Error::Init`],
/// [`Error::Config`]) and [`Error::SimulationDiverged`] are fatal: the
/// control loop never enters (or leaves) the running state. A rejected
/// command or a failed publish is reported but the loop keeps stepping.
#[derive(Debug, thiserror::Error)]
#[must_use = "errors must be handled or explicitly ignored with let _ = ..."]
#[non_exhaustive]
pub enum Error {
    /// A canonical joint name has no counterpart on the backend.
    /// The robot description does not match the expected joint set.
    #[error("Joint resolution error: joint `{0}` not found on backend")]
    JointResolution(String),

    /// Backend construction or initialization failed.
    #[error("Backend initialization error: {0}")]
    Init(String),

    /// The backend produced an invalid (non-finite) state.
    #[error("Simulation diverged: {0}")]
    SimulationDiverged(String),

    /// Malformed command: wrong joint count or non-finite value.
    /// The previous command stays in effect.
    #[error("Command validation error: {0}")]
    CommandValidation(String),

    /// State could not be delivered to the message bus.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Invalid configuration parameter or unreadable configuration file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation attempted in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A worker thread failed outside of the simulation itself.
    #[error("Control loop error: {0}")]
    ControlLoop(String),

    /// Communication channel was closed unexpectedly.
    #[error("Channel closed")]
    ChannelClosed,

    /// Channel is full (backpressure).
    #[error("Channel full")]
    ChannelFull,
}

impl Error {
    /// Whether this error must stop the process rather than be absorbed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::JointResolution(_)
                | Error::Init(_)
                | Error::SimulationDiverged(_)
                | Error::Config(_)
                | Error::ControlLoop(_)
        )
    }

    /// Whether this error happened before the loop could start running
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Error::JointResolution(_) | Error::Init(_) | Error::Config(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(format!("I/O error: {}", e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(format!("TOML error: {}", e))
    }
}

/// Result type alias for go2sim-core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::JointResolution("RL_calf_joint".into()).is_fatal());
        assert!(Error::JointResolution("RL_calf_joint".into()).is_startup_failure());
        assert!(Error::SimulationDiverged("nan".into()).is_fatal());
        assert!(!Error::SimulationDiverged("nan".into()).is_startup_failure());
        assert!(!Error::CommandValidation("11 joints".into()).is_fatal());
        assert!(!Error::Publish("full".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let e = Error::JointResolution("RL_calf_joint".into());
        assert_eq!(
            e.to_string(),
            "Joint resolution error: joint `RL_calf_joint` not found on backend"
        );
    }
}
