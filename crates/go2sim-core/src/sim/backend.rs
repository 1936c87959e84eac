//! Physics backend trait

use crate::robot::{JointCatalog, JointInfo, JointMap, JointTargets, RobotState};
use crate::{Error, Result};

use super::SimConfig;

/// Trait for physics backends
///
/// A backend owns the simulated world. It is driven from a single execution
/// context: the control loop serializes every `execute_step`/`get_state`
/// call. Joint metadata is available right after construction so that a
/// [`JointMap`] can be built before `initialize`.
pub trait PhysicsBackend: JointCatalog + Send {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Put the world in its initial configuration
    ///
    /// Called once, after the joint map has been resolved against this
    /// backend.
    fn initialize(&mut self, config: &SimConfig, joints: &JointMap) -> Result<()>;

    /// Live readout of joint and base state
    ///
    /// Fails before `initialize` and when the readout is not finite.
    fn get_state(&self) -> Result<RobotState>;

    /// Apply the PD + feed-forward law on the current pre-step state and
    /// advance the world by exactly one timestep
    ///
    /// Reports [`Error::SimulationDiverged`] when the world ends up in a
    /// non-finite state.
    fn execute_step(&mut self, targets: &JointTargets) -> Result<()>;

    /// Simulated time in seconds
    fn sim_time(&self) -> f64;

    /// Release the world
    fn shutdown(&mut self) {}
}

impl<B: PhysicsBackend + ?Sized> PhysicsBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&mut self, config: &SimConfig, joints: &JointMap) -> Result<()> {
        (**self).initialize(config, joints)
    }

    fn get_state(&self) -> Result<RobotState> {
        (**self).get_state()
    }

    fn execute_step(&mut self, targets: &JointTargets) -> Result<()> {
        (**self).execute_step(targets)
    }

    fn sim_time(&self) -> f64 {
        (**self).sim_time()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

impl<C: JointCatalog + ?Sized> JointCatalog for Box<C> {
    fn joint_infos(&self) -> Vec<JointInfo> {
        (**self).joint_infos()
    }
}

/// Reject a non-finite snapshot
pub(crate) fn ensure_finite(state: RobotState, backend: &str, sim_time: f64) -> Result<RobotState> {
    match state.first_non_finite() {
        None => Ok(state),
        Some(what) => Err(Error::SimulationDiverged(format!(
            "{}: non-finite {} at t={:.4}s",
            backend, what, sim_time
        ))),
    }
}

/// Wrap a substrate error as a startup failure
pub(crate) fn startup_error(context: &str, e: Error) -> Error {
    match e {
        Error::Init(msg) => Error::Init(format!("{}: {}", context, msg)),
        other => Error::Init(format!("{}: {}", context, other)),
    }
}

/// Borrow the joint map or fail if the backend was never initialized
pub(crate) fn require_joints<'a>(joints: &'a Option<JointMap>, backend: &str) -> Result<&'a JointMap> {
    joints
        .as_ref()
        .ok_or_else(|| Error::InvalidState(format!("{} backend not initialized", backend)))
}
