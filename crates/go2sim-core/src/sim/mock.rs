//! In-process stand-ins for the physics substrates
//!
//! [`MockEngine`] implements [`RigidBodyEngine`] and [`MockDynamics`]
//! implements [`ContactDynamics`]. Both drive the same lumped model: each
//! joint is a damped rotor integrated with semi-implicit Euler, the base is a
//! point mass under gravity resting on a spring-damper floor. The model is
//! deterministic, so a joint at rest with zero torque keeps its exact
//! position.
//!
//! They differ where the real substrates differ: joint enumeration order,
//! fixed joints, default motors, the inertial-frame offset of the base and
//! the generalized-vector layout.

use std::path::{Path, PathBuf};

use crate::math::Quaternion;
use crate::robot::{JointHandle, JointInfo};
use crate::{Error, Result};

use super::dynamics::{CollisionPair, ContactDynamics, BASE_NQ, BASE_NV, FLOOR_GEOMETRY};
use super::engine::RigidBodyEngine;
use super::ContactConfig;

/// Rotor inertia of every joint (kg·m²)
const JOINT_INERTIA: f64 = 0.05;
/// Viscous joint friction (N·m·s/rad)
const JOINT_DAMPING: f64 = 0.01;
/// Lumped robot mass (kg)
const BASE_MASS: f64 = 15.0;
/// Base height above the floor at which the feet touch down (m)
const STANDING_HEIGHT: f64 = 0.3;
/// Velocity gain of the engine's default joint motors
const MOTOR_VELOCITY_GAIN: f64 = 100.0;
/// Force cap of the engine's default joint motors (N·m)
const MOTOR_MAX_FORCE: f64 = 20.0;
/// Floor contact of the engine's ground plane
const ENGINE_FLOOR_STIFFNESS: f64 = 2.0e4;
const ENGINE_FLOOR_DAMPING: f64 = 8.0e2;

const ENGINE_LEG_ORDER: [&str; 4] = ["FR", "FL", "RR", "RL"];
const DYNAMICS_LEG_ORDER: [&str; 4] = ["FL", "FR", "RL", "RR"];
const LEG_JOINTS: [&str; 3] = ["hip", "thigh", "calf"];

#[derive(Debug, Clone, Copy, Default)]
struct Dof {
    q: f64,
    v: f64,
    tau: f64,
    fixed: bool,
    motor: bool,
}

#[derive(Debug, Clone, Copy)]
struct FloorContact {
    height: f64,
    stiffness: f64,
    damping: f64,
}

#[derive(Debug, Clone)]
struct LumpedWorld {
    dofs: Vec<Dof>,
    base_position: [f64; 3],
    base_orientation: Quaternion,
    base_linear: [f64; 3],
    base_angular: [f64; 3],
    gravity: [f64; 3],
    timestep: f64,
    floor: Option<FloorContact>,
    steps: u64,
    diverge_at: Option<u64>,
}

impl LumpedWorld {
    fn new(dofs: Vec<Dof>, base_position: [f64; 3]) -> Self {
        Self {
            dofs,
            base_position,
            base_orientation: Quaternion::identity(),
            base_linear: [0.0; 3],
            base_angular: [0.0; 3],
            gravity: [0.0, 0.0, -9.81],
            timestep: 0.002,
            floor: None,
            steps: 0,
            diverge_at: None,
        }
    }

    fn step(&mut self) {
        let dt = self.timestep;
        for dof in self.dofs.iter_mut().filter(|d| !d.fixed) {
            let mut tau = dof.tau;
            if dof.motor {
                tau += (-MOTOR_VELOCITY_GAIN * dof.v).clamp(-MOTOR_MAX_FORCE, MOTOR_MAX_FORCE);
            }
            let acc = (tau - JOINT_DAMPING * dof.v) / JOINT_INERTIA;
            dof.v += acc * dt;
            dof.q += dof.v * dt;
        }

        let mut force = self.gravity.map(|g| g * BASE_MASS);
        if let Some(floor) = self.floor {
            let penetration = floor.height + STANDING_HEIGHT - self.base_position[2];
            if penetration > 0.0 {
                let normal = floor.stiffness * penetration - floor.damping * self.base_linear[2];
                force[2] += normal.max(0.0);
            }
        }
        for k in 0..3 {
            self.base_linear[k] += force[k] / BASE_MASS * dt;
            self.base_position[k] += self.base_linear[k] * dt;
        }

        self.steps += 1;
        if self.diverge_at.is_some_and(|n| self.steps >= n) {
            self.base_position = [f64::NAN; 3];
        }
    }
}

fn revolute(fixed: bool) -> Dof {
    Dof {
        fixed,
        ..Dof::default()
    }
}

/// Rigid-body engine stand-in
///
/// Enumerates joints leg by leg (FR, FL, RR, RL) with a fixed foot joint
/// after each calf, so engine handles never equal canonical indices. Joint
/// motors start enabled and resist motion until disabled.
#[derive(Debug, Clone)]
pub struct MockEngine {
    names: Vec<String>,
    world: LumpedWorld,
    inertia_offset: [f64; 3],
    description: Option<PathBuf>,
    plane: Option<[f64; 3]>,
    load_error: Option<String>,
    reading_limit: Option<usize>,
    connected: bool,
}

impl MockEngine {
    /// Go2 joint layout
    pub fn go2() -> Self {
        let names = ENGINE_LEG_ORDER
            .iter()
            .flat_map(|leg| {
                LEG_JOINTS
                    .iter()
                    .map(move |j| format!("{}_{}_joint", leg, j))
                    .chain(std::iter::once(format!("{}_foot_joint", leg)))
            })
            .collect();
        Self::with_joint_names(names)
    }

    /// Arbitrary joint list; names ending in `_foot_joint` are fixed
    pub fn with_joint_names(names: Vec<String>) -> Self {
        let dofs = names
            .iter()
            .map(|n| Dof {
                motor: true,
                ..revolute(n.ends_with("_foot_joint"))
            })
            .collect();
        Self {
            names,
            world: LumpedWorld::new(dofs, [0.0; 3]),
            inertia_offset: [0.021, 0.0, -0.005],
            description: None,
            plane: None,
            load_error: None,
            reading_limit: None,
            connected: true,
        }
    }

    /// Drop a joint from the description
    pub fn without_joint(self, name: &str) -> Self {
        let names = self.names.into_iter().filter(|n| n != name).collect();
        Self::with_joint_names(names)
    }

    /// Produce a non-finite base position from the given step on
    pub fn diverge_at_step(mut self, step: u64) -> Self {
        self.world.diverge_at = Some(step);
        self
    }

    /// Fail to load the robot description
    pub fn fail_to_load(mut self, reason: impl Into<String>) -> Self {
        self.load_error = Some(reason.into());
        self
    }

    /// Report at most `count` joint states per query
    pub fn truncate_joint_states(mut self, count: usize) -> Self {
        self.reading_limit = Some(count);
        self
    }

    /// Whether the default motor of a joint is off
    pub fn motor_disabled(&self, joint: JointHandle) -> bool {
        self.world.dofs.get(joint.0).is_some_and(|d| !d.motor)
    }

    /// Torque most recently set on a joint
    pub fn applied_torque(&self, joint: JointHandle) -> f64 {
        self.world.dofs.get(joint.0).map_or(0.0, |d| d.tau)
    }

    /// Robot description passed to `load_robot`
    pub fn description(&self) -> Option<&Path> {
        self.description.as_deref()
    }

    /// Ground plane origin
    pub fn ground_plane(&self) -> Option<[f64; 3]> {
        self.plane
    }

    pub fn steps(&self) -> u64 {
        self.world.steps
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl RigidBodyEngine for MockEngine {
    fn engine_name(&self) -> &str {
        "mock-engine"
    }

    fn load_robot(&mut self, description: &Path, base_position: [f64; 3]) -> Result<()> {
        if let Some(reason) = &self.load_error {
            return Err(Error::Init(format!(
                "cannot load {}: {}",
                description.display(),
                reason
            )));
        }
        self.description = Some(description.to_path_buf());
        self.world.base_position = base_position;
        Ok(())
    }

    fn load_ground_plane(&mut self) -> Result<()> {
        self.reset_ground_plane([0.0; 3]);
        Ok(())
    }

    fn reset_ground_plane(&mut self, position: [f64; 3]) {
        self.plane = Some(position);
        self.world.floor = Some(FloorContact {
            height: position[2],
            stiffness: ENGINE_FLOOR_STIFFNESS,
            damping: ENGINE_FLOOR_DAMPING,
        });
    }

    fn joint_infos(&self) -> Vec<JointInfo> {
        if self.description.is_none() {
            return Vec::new();
        }
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| JointInfo::new(i, n.as_str()))
            .collect()
    }

    fn base_local_inertia_offset(&self) -> [f64; 3] {
        self.inertia_offset
    }

    fn set_timestep(&mut self, dt: f64) {
        self.world.timestep = dt;
    }

    fn set_gravity(&mut self, gravity: [f64; 3]) {
        self.world.gravity = gravity;
    }

    fn reset_joint_state(&mut self, joint: JointHandle, position: f64) {
        if let Some(dof) = self.world.dofs.get_mut(joint.0) {
            dof.q = position;
            dof.v = 0.0;
        }
    }

    fn disable_joint_motors(&mut self, joints: &[JointHandle]) {
        for h in joints {
            if let Some(dof) = self.world.dofs.get_mut(h.0) {
                dof.motor = false;
            }
        }
    }

    fn joint_states(&self, joints: &[JointHandle]) -> Vec<(f64, f64)> {
        joints
            .iter()
            .take(self.reading_limit.unwrap_or(joints.len()))
            .map(|h| {
                self.world
                    .dofs
                    .get(h.0)
                    .map_or((f64::NAN, f64::NAN), |d| (d.q, d.v))
            })
            .collect()
    }

    fn base_pose(&self) -> ([f64; 3], Quaternion) {
        let orientation = self.world.base_orientation;
        let offset = orientation.rotate(self.inertia_offset);
        let link = self.world.base_position;
        (std::array::from_fn(|k| link[k] + offset[k]), orientation)
    }

    fn base_velocity(&self) -> ([f64; 3], [f64; 3]) {
        (self.world.base_linear, self.world.base_angular)
    }

    fn set_joint_torques(&mut self, joints: &[JointHandle], torques: &[f64]) {
        for (h, tau) in joints.iter().zip(torques) {
            if let Some(dof) = self.world.dofs.get_mut(h.0) {
                dof.tau = *tau;
            }
        }
    }

    fn step_simulation(&mut self) {
        self.world.step();
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Dynamics library stand-in
///
/// Stores actuated joints in model order (FL, FR, RL, RR). Geometries are
/// the base link plus thigh, calf and foot of each leg.
#[derive(Debug, Clone)]
pub struct MockDynamics {
    joint_names: Vec<String>,
    geometries: Vec<String>,
    pairs: Vec<CollisionPair>,
    contact: Option<ContactConfig>,
    world: Option<LumpedWorld>,
    generalized: Vec<f64>,
    description: Option<PathBuf>,
    load_error: Option<String>,
    diverge_at: Option<u64>,
}

impl MockDynamics {
    /// Go2 model
    pub fn go2() -> Self {
        let joint_names = DYNAMICS_LEG_ORDER
            .iter()
            .flat_map(|leg| LEG_JOINTS.iter().map(move |j| format!("{}_{}_joint", leg, j)))
            .collect();
        Self::with_joint_names(joint_names)
    }

    /// Arbitrary actuated joint list in model order
    pub fn with_joint_names(joint_names: Vec<String>) -> Self {
        let geometries = std::iter::once("base_link".to_string())
            .chain(DYNAMICS_LEG_ORDER.iter().flat_map(|leg| {
                ["thigh", "calf", "foot"]
                    .iter()
                    .map(move |part| format!("{}_{}", leg, part))
            }))
            .collect();
        Self {
            joint_names,
            geometries,
            pairs: Vec::new(),
            contact: None,
            world: None,
            generalized: Vec::new(),
            description: None,
            load_error: None,
            diverge_at: None,
        }
    }

    /// Drop a joint from the model
    pub fn without_joint(mut self, name: &str) -> Self {
        self.joint_names.retain(|n| n != name);
        self
    }

    /// Produce a non-finite base position from the given step on
    pub fn diverge_at_step(mut self, step: u64) -> Self {
        self.diverge_at = Some(step);
        self
    }

    /// Fail to load the robot description
    pub fn fail_to_load(mut self, reason: impl Into<String>) -> Self {
        self.load_error = Some(reason.into());
        self
    }

    /// Generalized forces passed to the last `execute`
    pub fn generalized_forces(&self) -> &[f64] {
        &self.generalized
    }

    /// Contact parameters in effect
    pub fn contact(&self) -> Option<&ContactConfig> {
        self.contact.as_ref()
    }

    /// Gravity of the running simulation, zero before creation
    pub fn gravity(&self) -> [f64; 3] {
        self.world.as_ref().map_or([0.0; 3], |w| w.gravity)
    }

    pub fn steps(&self) -> u64 {
        self.world.as_ref().map_or(0, |w| w.steps)
    }

    fn floor_index(&self) -> Option<usize> {
        self.geometries.iter().position(|g| g == FLOOR_GEOMETRY)
    }
}

impl ContactDynamics for MockDynamics {
    fn library_name(&self) -> &str {
        "mock-dynamics"
    }

    fn load_model(&mut self, description: &Path) -> Result<()> {
        if let Some(reason) = &self.load_error {
            return Err(Error::Init(format!(
                "cannot build model from {}: {}",
                description.display(),
                reason
            )));
        }
        self.description = Some(description.to_path_buf());
        Ok(())
    }

    fn joint_infos(&self) -> Vec<JointInfo> {
        if self.description.is_none() {
            return Vec::new();
        }
        self.joint_names
            .iter()
            .enumerate()
            .map(|(i, n)| JointInfo::new(i, n.as_str()))
            .collect()
    }

    fn num_joint_slots(&self) -> usize {
        self.joint_names.len()
    }

    fn add_floor(&mut self) -> usize {
        if let Some(i) = self.floor_index() {
            return i;
        }
        self.geometries.push(FLOOR_GEOMETRY.to_string());
        self.geometries.len() - 1
    }

    fn geometry_names(&self) -> Vec<String> {
        self.geometries.clone()
    }

    fn set_physics_properties(&mut self, contact: &ContactConfig) {
        self.contact = Some(contact.clone());
    }

    fn add_system_collision_pairs(&mut self, _q0: &[f64]) {
        let n = self.geometries.len();
        self.pairs = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| CollisionPair::new(i, j)))
            .collect();
    }

    fn collision_pairs(&self) -> Vec<CollisionPair> {
        self.pairs.clone()
    }

    fn set_collision_pairs(&mut self, pairs: Vec<CollisionPair>) {
        self.pairs = pairs;
    }

    fn create_simulation(
        &mut self,
        q0: &[f64],
        v0: &[f64],
        timestep: f64,
        gravity: [f64; 3],
    ) -> Result<()> {
        let n = self.joint_names.len();
        if q0.len() != BASE_NQ + n || v0.len() != BASE_NV + n {
            return Err(Error::Init(format!(
                "expected nq={} nv={}, got {} and {}",
                BASE_NQ + n,
                BASE_NV + n,
                q0.len(),
                v0.len()
            )));
        }

        let dofs = q0[BASE_NQ..]
            .iter()
            .zip(&v0[BASE_NV..])
            .map(|(&q, &v)| Dof {
                q,
                v,
                ..revolute(false)
            })
            .collect();
        let mut world = LumpedWorld::new(dofs, [q0[0], q0[1], q0[2]]);
        world.base_orientation = Quaternion::from_xyzw([q0[3], q0[4], q0[5], q0[6]]);
        world.base_linear = [v0[0], v0[1], v0[2]];
        world.base_angular = [v0[3], v0[4], v0[5]];
        world.gravity = gravity;
        world.timestep = timestep;
        world.diverge_at = self.diverge_at;

        let floor_active = self
            .floor_index()
            .is_some_and(|f| self.pairs.iter().any(|p| p.first == f || p.second == f));
        if floor_active {
            let contact = self.contact.clone().unwrap_or_default();
            let stiffness = if contact.compliance > 0.0 {
                1.0 / contact.compliance
            } else {
                contact.stiffness
            };
            world.floor = Some(FloorContact {
                height: 0.0,
                stiffness,
                damping: contact.damping,
            });
        }

        self.world = Some(world);
        Ok(())
    }

    fn state(&self) -> (Vec<f64>, Vec<f64>) {
        let Some(world) = &self.world else {
            return (Vec::new(), Vec::new());
        };
        let mut q = Vec::with_capacity(BASE_NQ + world.dofs.len());
        q.extend_from_slice(&world.base_position);
        q.extend_from_slice(&world.base_orientation.to_xyzw());
        q.extend(world.dofs.iter().map(|d| d.q));

        let mut v = Vec::with_capacity(BASE_NV + world.dofs.len());
        v.extend_from_slice(&world.base_linear);
        v.extend_from_slice(&world.base_angular);
        v.extend(world.dofs.iter().map(|d| d.v));
        (q, v)
    }

    fn execute(&mut self, tau: &[f64]) -> Result<()> {
        let world = self
            .world
            .as_mut()
            .ok_or_else(|| Error::InvalidState("simulation not created".into()))?;
        if tau.len() != BASE_NV + world.dofs.len() {
            return Err(Error::InvalidState(format!(
                "expected {} generalized forces, got {}",
                BASE_NV + world.dofs.len(),
                tau.len()
            )));
        }
        for (dof, t) in world.dofs.iter_mut().zip(&tau[BASE_NV..]) {
            dof.tau = *t;
        }
        self.generalized = tau.to_vec();
        world.step();
        Ok(())
    }
}
