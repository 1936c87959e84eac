//! Physics backend abstraction
//!
//! Two interchangeable variants sit behind [`PhysicsBackend`]:
//!
//! - [`EngineBackend`] - a full rigid-body engine with contact resolution
//! - [`DynamicsBackend`] - a rigid-body dynamics library with a floor-only
//!   compliant contact model
//!
//! The substrates themselves are reached through [`RigidBodyEngine`] and
//! [`ContactDynamics`]; [`MockEngine`] and [`MockDynamics`] implement them
//! in-process.

mod backend;
mod config;
mod dynamics;
mod engine;
mod mock;

pub use backend::PhysicsBackend;
pub use config::{
    BackendKind, ContactConfig, PacingConfig, PhysicsConfig, RobotConfig, SimConfig, TimingMode,
    TopicNames, DEFAULT_INITIAL_JOINT_POSITIONS,
};
pub use dynamics::{
    retain_pairs_touching, CollisionPair, ContactDynamics, DynamicsBackend, BASE_NQ, BASE_NV,
    FLOOR_GEOMETRY,
};
pub use engine::{EngineBackend, RigidBodyEngine};
pub use mock::{MockDynamics, MockEngine};

/// Connect the in-process backend selected by `config.backend`
pub fn connect_mock_backend(config: &SimConfig) -> crate::Result<Box<dyn PhysicsBackend>> {
    Ok(match config.backend {
        BackendKind::Engine => Box::new(EngineBackend::connect(MockEngine::go2(), &config.robot)?),
        BackendKind::Dynamics => {
            Box::new(DynamicsBackend::connect(MockDynamics::go2(), &config.robot)?)
        }
    })
}
