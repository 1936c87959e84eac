//! Go2 joint layout and the state/command data model
//!
//! Every message and backend in this crate indexes joints by the canonical
//! order below. Backends translate to their own handles through a
//! [`JointMap`], which is the only place that knows both orderings.

mod joint_map;
mod types;

pub use joint_map::{JointCatalog, JointHandle, JointInfo, JointMap};
pub use types::{BaseState, JointCommand, JointState, JointTargets, LowCmd, RobotState};

/// Number of actuated leg joints
pub const NUM_JOINTS: usize = 12;

/// Joint names as they appear in the robot description, canonical order
pub const JOINT_NAMES: [&str; NUM_JOINTS] = [
    "FR_hip_joint",
    "FR_thigh_joint",
    "FR_calf_joint",
    "FL_hip_joint",
    "FL_thigh_joint",
    "FL_calf_joint",
    "RR_hip_joint",
    "RR_thigh_joint",
    "RR_calf_joint",
    "RL_hip_joint",
    "RL_thigh_joint",
    "RL_calf_joint",
];
