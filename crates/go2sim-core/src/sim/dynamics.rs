//! Dynamics backend: rigid-body dynamics library plus a floor-only contact model
//!
//! The dynamics library is an external collaborator reached through
//! [`ContactDynamics`]. State is exchanged as free-flyer generalized
//! vectors:
//!
//! ```text
//! q = [ base position (3) | base quaternion x,y,z,w (4) | joints (n) ]
//! v = [ base linear (3)   | base angular (3)            | joints (n) ]
//! ```
//!
//! Joint slots follow the library's model order, which need not be the
//! canonical order; every access goes through the [`JointMap`].

use std::path::Path;

use crate::control::pd_feedforward_torque;
use crate::math::Quaternion;
use crate::robot::{
    BaseState, JointCatalog, JointInfo, JointMap, JointState, JointTargets, RobotState,
    NUM_JOINTS,
};
use crate::{Error, Result};

use super::backend::{ensure_finite, require_joints, startup_error};
use super::{ContactConfig, PhysicsBackend, RobotConfig, SimConfig};

/// Base entries in the configuration vector
pub const BASE_NQ: usize = 7;
/// Base entries in the velocity vector
pub const BASE_NV: usize = 6;
/// Name of the floor geometry added at initialization
pub const FLOOR_GEOMETRY: &str = "floor";

/// A pair of geometry indices checked for contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollisionPair {
    pub first: usize,
    pub second: usize,
}

impl CollisionPair {
    pub fn new(first: usize, second: usize) -> Self {
        Self { first, second }
    }

    /// Whether either side is the named geometry
    pub fn touches(&self, geometry_names: &[String], name: &str) -> bool {
        let is = |i: usize| geometry_names.get(i).is_some_and(|n| n == name);
        is(self.first) || is(self.second)
    }
}

/// Keep only the pairs with the named geometry on one side
pub fn retain_pairs_touching(
    pairs: Vec<CollisionPair>,
    geometry_names: &[String],
    name: &str,
) -> Vec<CollisionPair> {
    pairs
        .into_iter()
        .filter(|pair| pair.touches(geometry_names, name))
        .collect()
}

/// Boundary to a rigid-body dynamics library with a compliant contact solver
pub trait ContactDynamics: Send {
    /// Library name for logging
    fn library_name(&self) -> &str;

    /// Build the kinematic model and geometry from the robot description
    fn load_model(&mut self, description: &Path) -> Result<()>;

    /// Actuated joints; handles are joint slots in model order
    fn joint_infos(&self) -> Vec<JointInfo>;

    /// Number of actuated joint slots (n)
    fn num_joint_slots(&self) -> usize;

    /// Add a floor geometry named [`FLOOR_GEOMETRY`], returning its index
    fn add_floor(&mut self) -> usize;

    /// Names of all geometries, indexed like collision pairs
    fn geometry_names(&self) -> Vec<String>;

    /// Apply contact material and compliance
    fn set_physics_properties(&mut self, contact: &ContactConfig);

    /// Register every geometry pair not in contact at `q0`
    fn add_system_collision_pairs(&mut self, q0: &[f64]);

    fn collision_pairs(&self) -> Vec<CollisionPair>;

    fn set_collision_pairs(&mut self, pairs: Vec<CollisionPair>);

    /// Create the simulation at `(q0, v0)`
    fn create_simulation(
        &mut self,
        q0: &[f64],
        v0: &[f64],
        timestep: f64,
        gravity: [f64; 3],
    ) -> Result<()>;

    /// Current `(q, v)`
    fn state(&self) -> (Vec<f64>, Vec<f64>);

    /// Apply generalized forces (length `BASE_NV + n`) and advance one step
    fn execute(&mut self, tau: &[f64]) -> Result<()>;
}

/// Physics backend over a [`ContactDynamics`] library
pub struct DynamicsBackend<D: ContactDynamics> {
    sim: D,
    joints: Option<JointMap>,
    timestep: f64,
    sim_time: f64,
}

impl<D: ContactDynamics> DynamicsBackend<D> {
    /// Load the robot model into the library
    pub fn connect(mut sim: D, robot: &RobotConfig) -> Result<Self> {
        tracing::info!(
            "{}: loading robot description {}",
            sim.library_name(),
            robot.description.display()
        );
        sim.load_model(&robot.description)
            .map_err(|e| startup_error(sim.library_name(), e))?;

        Ok(Self {
            sim,
            joints: None,
            timestep: 0.0,
            sim_time: 0.0,
        })
    }

    /// Access the underlying library
    pub fn dynamics(&self) -> &D {
        &self.sim
    }

    /// Initial `q` in model order
    fn initial_configuration(&self, config: &SimConfig, joints: &JointMap) -> Result<Vec<f64>> {
        let n = self.sim.num_joint_slots();
        let mut q0 = vec![0.0; BASE_NQ + n];
        q0[..3].copy_from_slice(&config.robot.base_position);
        q0[3..BASE_NQ].copy_from_slice(&Quaternion::identity().to_xyzw());
        for (i, name, handle) in joints.iter() {
            let slot = q0.get_mut(BASE_NQ + handle.0).ok_or_else(|| {
                Error::Init(format!("{} maps to slot {} outside the model", name, handle.0))
            })?;
            *slot = config.robot.initial_joint_positions[i];
        }
        Ok(q0)
    }

    fn read(&self, joints: &JointMap) -> Result<(Vec<f64>, Vec<f64>)> {
        let (q, v) = self.sim.state();
        let n = self.sim.num_joint_slots();
        if q.len() != BASE_NQ + n || v.len() != BASE_NV + n {
            return Err(Error::SimulationDiverged(format!(
                "{}: state has wrong size (nq={}, nv={})",
                self.sim.library_name(),
                q.len(),
                v.len()
            )));
        }
        if let Some(h) = joints.handles().iter().find(|h| h.0 >= n) {
            return Err(Error::InvalidState(format!(
                "joint slot {} outside a model with {} joints",
                h.0, n
            )));
        }
        Ok((q, v))
    }
}

impl<D: ContactDynamics> JointCatalog for DynamicsBackend<D> {
    fn joint_infos(&self) -> Vec<JointInfo> {
        self.sim.joint_infos()
    }
}

impl<D: ContactDynamics> PhysicsBackend for DynamicsBackend<D> {
    fn name(&self) -> &str {
        "dynamics"
    }

    fn initialize(&mut self, config: &SimConfig, joints: &JointMap) -> Result<()> {
        let name = self.sim.library_name().to_string();
        self.sim.add_floor();
        self.sim.set_physics_properties(&config.physics.contact);

        let q0 = self.initial_configuration(config, joints)?;
        self.sim.add_system_collision_pairs(&q0);

        let geometry_names = self.sim.geometry_names();
        let all_pairs = self.sim.collision_pairs();
        let total = all_pairs.len();
        let floor_pairs = retain_pairs_touching(all_pairs, &geometry_names, FLOOR_GEOMETRY);
        tracing::info!(
            "{}: kept {} floor collision pairs, pruned {}",
            name,
            floor_pairs.len(),
            total - floor_pairs.len()
        );
        self.sim.set_collision_pairs(floor_pairs);

        let v0 = vec![0.0; BASE_NV + self.sim.num_joint_slots()];
        self.sim
            .create_simulation(&q0, &v0, config.physics.timestep, config.physics.gravity)
            .map_err(|e| startup_error(&name, e))?;

        self.joints = Some(joints.clone());
        self.timestep = config.physics.timestep;
        self.sim_time = 0.0;
        tracing::info!(
            "{}: initialized (dt={}s, material={}, compliance={})",
            name,
            config.physics.timestep,
            config.physics.contact.material,
            config.physics.contact.compliance
        );
        Ok(())
    }

    fn get_state(&self) -> Result<RobotState> {
        let joints = require_joints(&self.joints, "dynamics")?;
        let (q, v) = self.read(joints)?;

        let state = RobotState::new(
            std::array::from_fn(|i| {
                let h = joints.handle(i).0;
                JointState::servo(q[BASE_NQ + h], v[BASE_NV + h])
            }),
            BaseState {
                position: [q[0], q[1], q[2]],
                orientation: Quaternion::from_xyzw([q[3], q[4], q[5], q[6]]),
                linear_velocity: [v[0], v[1], v[2]],
                angular_velocity: [v[3], v[4], v[5]],
            },
        );
        ensure_finite(state, "dynamics", self.sim_time)
    }

    fn execute_step(&mut self, targets: &JointTargets) -> Result<()> {
        let joints = require_joints(&self.joints, "dynamics")?.clone();
        let (q_full, v_full) = self.read(&joints)?;

        let q: [f64; NUM_JOINTS] = std::array::from_fn(|i| q_full[BASE_NQ + joints.handle(i).0]);
        let v: [f64; NUM_JOINTS] = std::array::from_fn(|i| v_full[BASE_NV + joints.handle(i).0]);
        let tau = pd_feedforward_torque(targets, &q, &v);

        let mut generalized = vec![0.0; v_full.len()];
        for (i, _, handle) in joints.iter() {
            generalized[BASE_NV + handle.0] = tau[i];
        }

        self.sim.execute(&generalized).map_err(|e| match e {
            Error::SimulationDiverged(_) => e,
            other => Error::SimulationDiverged(format!("{}: {}", self.sim.library_name(), other)),
        })?;
        self.sim_time += self.timestep;

        self.get_state().map(|_| ())
    }

    fn sim_time(&self) -> f64 {
        self.sim_time
    }

    fn shutdown(&mut self) {
        self.joints = None;
        tracing::info!("{}: released", self.sim.library_name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LowCmd;
    use crate::sim::MockDynamics;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn backend() -> (DynamicsBackend<MockDynamics>, JointMap, SimConfig) {
        let config = SimConfig::default();
        let mut backend = DynamicsBackend::connect(MockDynamics::go2(), &config.robot).unwrap();
        let joints = JointMap::build(&backend).unwrap();
        backend.initialize(&config, &joints).unwrap();
        (backend, joints, config)
    }

    #[test]
    fn test_retain_pairs_touching_floor() {
        let geometry = names(&["base", "FL_calf", "FR_calf", "floor"]);
        let pairs = vec![
            CollisionPair::new(0, 1),
            CollisionPair::new(1, 3),
            CollisionPair::new(1, 2),
            CollisionPair::new(3, 2),
        ];
        let kept = retain_pairs_touching(pairs, &geometry, FLOOR_GEOMETRY);
        assert_eq!(kept, vec![CollisionPair::new(1, 3), CollisionPair::new(3, 2)]);
    }

    #[test]
    fn test_out_of_range_geometry_never_matches() {
        let geometry = names(&["floor"]);
        assert!(!CollisionPair::new(5, 6).touches(&geometry, FLOOR_GEOMETRY));
    }

    #[test]
    fn test_initialize_prunes_to_floor_pairs() {
        let (backend, _, _) = backend();
        let sim = backend.dynamics();
        let geometry = sim.geometry_names();
        let pairs = sim.collision_pairs();
        assert!(!pairs.is_empty());
        assert!(pairs.iter().all(|p| p.touches(&geometry, FLOOR_GEOMETRY)));
        // Every non-floor geometry keeps its pair with the floor
        assert_eq!(pairs.len(), geometry.len() - 1);
    }

    #[test]
    fn test_contact_parameters_from_config() {
        let (backend, _, config) = backend();
        assert_eq!(backend.dynamics().contact(), Some(&config.physics.contact));
        assert_eq!(backend.dynamics().gravity(), config.physics.gravity);
    }

    #[test]
    fn test_initial_configuration_in_canonical_order() {
        // The mock model stores joints FL, FR, RL, RR
        let (backend, joints, config) = backend();
        let state = backend.get_state().unwrap();
        assert_eq!(state.positions(), config.robot.initial_joint_positions);
        assert_ne!(joints.handle(0).0, 0);
        assert_eq!(state.base().position, config.robot.base_position);
        assert_eq!(state.base().orientation, Quaternion::identity());
    }

    #[test]
    fn test_torque_lands_in_model_slots() {
        let (mut backend, joints, config) = backend();
        let targets = LowCmd::hold([0.0; NUM_JOINTS], 10.0, 1.0).targets();
        backend.execute_step(&targets).unwrap();

        let expected = pd_feedforward_torque(
            &targets,
            &config.robot.initial_joint_positions,
            &[0.0; NUM_JOINTS],
        );
        let applied = backend.dynamics().generalized_forces();
        assert_eq!(&applied[..BASE_NV], &[0.0; BASE_NV]);
        for (i, _, h) in joints.iter() {
            assert_eq!(applied[BASE_NV + h.0], expected[i]);
        }
    }

    #[test]
    fn test_divergence_reported() {
        let config = SimConfig::default();
        let mut backend =
            DynamicsBackend::connect(MockDynamics::go2().diverge_at_step(1), &config.robot)
                .unwrap();
        let joints = JointMap::build(&backend).unwrap();
        backend.initialize(&config, &joints).unwrap();

        let err = backend.execute_step(&JointTargets::default()).unwrap_err();
        assert!(matches!(err, Error::SimulationDiverged(_)));
    }
}
