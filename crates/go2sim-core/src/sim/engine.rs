//! Engine backend: a full rigid-body engine with contact resolution
//!
//! The engine itself is an external collaborator reached through
//! [`RigidBodyEngine`]. This backend only decides what to read, what torque
//! to apply and when to step.

use std::path::Path;

use crate::control::pd_feedforward_torque;
use crate::math::Quaternion;
use crate::robot::{
    BaseState, JointCatalog, JointHandle, JointInfo, JointMap, JointState, JointTargets,
    RobotState, NUM_JOINTS,
};
use crate::{Error, Result};

use super::backend::{ensure_finite, require_joints, startup_error};
use super::{PhysicsBackend, RobotConfig, SimConfig};

/// Boundary to a rigid-body physics engine
///
/// Calls are made from one thread at a time.
pub trait RigidBodyEngine: Send {
    /// Engine name for logging
    fn engine_name(&self) -> &str;

    /// Load the robot description with the base at `base_position`
    fn load_robot(&mut self, description: &Path, base_position: [f64; 3]) -> Result<()>;

    /// Load a flat ground plane
    fn load_ground_plane(&mut self) -> Result<()>;

    /// Place the ground plane origin
    fn reset_ground_plane(&mut self, position: [f64; 3]);

    /// All joints of the loaded robot
    fn joint_infos(&self) -> Vec<JointInfo>;

    /// Offset of the base inertial frame from the base link frame
    fn base_local_inertia_offset(&self) -> [f64; 3];

    fn set_timestep(&mut self, dt: f64);

    fn set_gravity(&mut self, gravity: [f64; 3]);

    /// Teleport a joint to a position with zero velocity
    fn reset_joint_state(&mut self, joint: JointHandle, position: f64);

    /// Turn off the engine's default joint motors so torque control is unopposed
    fn disable_joint_motors(&mut self, joints: &[JointHandle]);

    /// Position and velocity of each requested joint
    fn joint_states(&self, joints: &[JointHandle]) -> Vec<(f64, f64)>;

    /// Base inertial-frame position and orientation in world frame
    fn base_pose(&self) -> ([f64; 3], Quaternion);

    /// Base linear and angular velocity in world frame
    fn base_velocity(&self) -> ([f64; 3], [f64; 3]);

    /// Set the generalized force of each joint for the next step
    fn set_joint_torques(&mut self, joints: &[JointHandle], torques: &[f64]);

    /// Advance by one timestep
    fn step_simulation(&mut self);

    /// Disconnect from the engine
    fn disconnect(&mut self) {}
}

/// Physics backend over a [`RigidBodyEngine`]
pub struct EngineBackend<E: RigidBodyEngine> {
    engine: E,
    joints: Option<JointMap>,
    inertia_offset: [f64; 3],
    timestep: f64,
    sim_time: f64,
}

impl<E: RigidBodyEngine> EngineBackend<E> {
    /// Load the robot and ground plane into the engine
    ///
    /// Any failure here is a startup failure.
    pub fn connect(mut engine: E, robot: &RobotConfig) -> Result<Self> {
        tracing::info!(
            "{}: loading robot description {}",
            engine.engine_name(),
            robot.description.display()
        );
        engine
            .load_robot(&robot.description, robot.base_position)
            .map_err(|e| startup_error(engine.engine_name(), e))?;
        engine
            .load_ground_plane()
            .map_err(|e| startup_error(engine.engine_name(), e))?;
        let inertia_offset = engine.base_local_inertia_offset();

        Ok(Self {
            engine,
            joints: None,
            inertia_offset,
            timestep: 0.0,
            sim_time: 0.0,
        })
    }

    /// Access the underlying engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn read_joints(&self, joints: &JointMap) -> Result<([f64; NUM_JOINTS], [f64; NUM_JOINTS])> {
        let states = self.engine.joint_states(joints.handles());
        if states.len() != NUM_JOINTS {
            return Err(Error::SimulationDiverged(format!(
                "{}: read {} joint states, expected {} at t={:.4}s",
                self.engine.engine_name(),
                states.len(),
                NUM_JOINTS,
                self.sim_time
            )));
        }
        let q = std::array::from_fn(|i| states[i].0);
        let v = std::array::from_fn(|i| states[i].1);
        Ok((q, v))
    }
}

impl<E: RigidBodyEngine> JointCatalog for EngineBackend<E> {
    fn joint_infos(&self) -> Vec<JointInfo> {
        self.engine.joint_infos()
    }
}

impl<E: RigidBodyEngine> PhysicsBackend for EngineBackend<E> {
    fn name(&self) -> &str {
        "engine"
    }

    fn initialize(&mut self, config: &SimConfig, joints: &JointMap) -> Result<()> {
        // Ground plane sits at the inertial offset so the feet rest on it
        self.engine.reset_ground_plane(self.inertia_offset);
        self.engine.set_timestep(config.physics.timestep);
        self.engine.set_gravity(config.physics.gravity);

        for (i, name, handle) in joints.iter() {
            let q0 = config.robot.initial_joint_positions[i];
            tracing::trace!("{} -> {:?} reset to {:.3}", name, handle, q0);
            self.engine.reset_joint_state(handle, q0);
        }
        self.engine.disable_joint_motors(joints.handles());

        self.joints = Some(joints.clone());
        self.timestep = config.physics.timestep;
        self.sim_time = 0.0;
        tracing::info!(
            "{}: initialized (dt={}s, gravity={:?})",
            self.engine.engine_name(),
            config.physics.timestep,
            config.physics.gravity
        );
        Ok(())
    }

    fn get_state(&self) -> Result<RobotState> {
        let joints = require_joints(&self.joints, "engine")?;
        let (q, v) = self.read_joints(joints)?;

        let (inertial_position, orientation) = self.engine.base_pose();
        let (linear_velocity, angular_velocity) = self.engine.base_velocity();
        // Engine reports the inertial frame; shift back to the link frame
        let offset = orientation.rotate(self.inertia_offset);
        let position = std::array::from_fn(|k| inertial_position[k] - offset[k]);

        let state = RobotState::new(
            std::array::from_fn(|i| JointState::servo(q[i], v[i])),
            BaseState {
                position,
                orientation,
                linear_velocity,
                angular_velocity,
            },
        );
        ensure_finite(state, "engine", self.sim_time)
    }

    fn execute_step(&mut self, targets: &JointTargets) -> Result<()> {
        let joints = require_joints(&self.joints, "engine")?.clone();
        let (q, v) = self.read_joints(&joints)?;
        let tau = pd_feedforward_torque(targets, &q, &v);

        self.engine.set_joint_torques(joints.handles(), &tau);
        self.engine.step_simulation();
        self.sim_time += self.timestep;

        self.get_state().map(|_| ())
    }

    fn sim_time(&self) -> f64 {
        self.sim_time
    }

    fn shutdown(&mut self) {
        self.engine.disconnect();
        self.joints = None;
        tracing::info!("{}: disconnected", self.engine.engine_name());
    }
}
