//! State and command types in canonical joint order

use serde::{Deserialize, Serialize};

use super::NUM_JOINTS;
use crate::math::{all_finite, Quaternion};

/// Mode reported for every simulated motor (servo mode)
pub const MOTOR_MODE_SERVO: u8 = 0x01;

/// Single joint state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    /// Joint position (rad)
    pub position: f64,
    /// Joint velocity (rad/s)
    pub velocity: f64,
    /// Motor mode
    pub mode: u8,
}

impl JointState {
    /// A servo-mode joint state
    pub fn servo(position: f64, velocity: f64) -> Self {
        Self {
            position,
            velocity,
            mode: MOTOR_MODE_SERVO,
        }
    }
}

/// Floating base state in world frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseState {
    /// Position [x, y, z] (m)
    pub position: [f64; 3],
    /// Orientation as emitted by the backend
    pub orientation: Quaternion,
    /// Linear velocity [vx, vy, vz] (m/s)
    pub linear_velocity: [f64; 3],
    /// Angular velocity [wx, wy, wz] (rad/s)
    pub angular_velocity: [f64; 3],
}

impl BaseState {
    /// Whether every component is finite
    pub fn is_finite(&self) -> bool {
        all_finite(&self.position)
            && self.orientation.is_finite()
            && all_finite(&self.linear_velocity)
            && all_finite(&self.angular_velocity)
    }
}

/// Full observable state snapshot
///
/// Produced fresh on every control cycle and never mutated afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    joints: [JointState; NUM_JOINTS],
    base: BaseState,
}

impl RobotState {
    /// Assemble a snapshot
    pub fn new(joints: [JointState; NUM_JOINTS], base: BaseState) -> Self {
        Self { joints, base }
    }

    /// Joint states in canonical order
    pub fn joints(&self) -> &[JointState; NUM_JOINTS] {
        &self.joints
    }

    /// Base state
    pub fn base(&self) -> &BaseState {
        &self.base
    }

    /// Joint positions as array
    pub fn positions(&self) -> [f64; NUM_JOINTS] {
        std::array::from_fn(|i| self.joints[i].position)
    }

    /// Joint velocities as array
    pub fn velocities(&self) -> [f64; NUM_JOINTS] {
        std::array::from_fn(|i| self.joints[i].velocity)
    }

    /// Name of the first non-finite quantity, if any
    pub fn first_non_finite(&self) -> Option<String> {
        for (i, j) in self.joints.iter().enumerate() {
            if !j.position.is_finite() || !j.velocity.is_finite() {
                return Some(format!("joint {} ({})", i, super::JOINT_NAMES[i]));
            }
        }
        if !self.base.is_finite() {
            return Some("base pose/velocity".to_string());
        }
        None
    }
}

/// Single joint command
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointCommand {
    /// Target position (rad)
    pub target_position: f64,
    /// Target velocity (rad/s)
    pub target_velocity: f64,
    /// Feedforward torque (Nm)
    pub feedforward_torque: f64,
    /// Position gain
    pub kp: f64,
    /// Velocity gain
    pub kd: f64,
}

impl JointCommand {
    /// Create a position command
    pub fn position(q: f64, kp: f64, kd: f64) -> Self {
        Self {
            target_position: q,
            kp,
            kd,
            ..Default::default()
        }
    }

    /// Whether every field is finite
    pub fn is_finite(&self) -> bool {
        all_finite(&[
            self.target_position,
            self.target_velocity,
            self.feedforward_torque,
            self.kp,
            self.kd,
        ])
    }
}

/// Validated low-level command for all 12 joints
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LowCmd {
    /// Per-joint commands in canonical order
    pub joints: [JointCommand; NUM_JOINTS],
}

impl LowCmd {
    /// Neutral command: zero gains, zero feed-forward, zero torque
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Hold the given configuration with uniform gains
    pub fn hold(positions: [f64; NUM_JOINTS], kp: f64, kd: f64) -> Self {
        Self {
            joints: std::array::from_fn(|i| JointCommand::position(positions[i], kp, kd)),
        }
    }

    /// Split into per-field arrays for the backend
    pub fn targets(&self) -> JointTargets {
        JointTargets::from(self)
    }
}

/// Actuation targets as consumed by `execute_step`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointTargets {
    /// Feedforward torques
    pub tau_ff: [f64; NUM_JOINTS],
    /// Desired positions
    pub q_des: [f64; NUM_JOINTS],
    /// Desired velocities
    pub v_des: [f64; NUM_JOINTS],
    /// Position gains
    pub kp: [f64; NUM_JOINTS],
    /// Velocity gains
    pub kd: [f64; NUM_JOINTS],
}

impl From<&LowCmd> for JointTargets {
    fn from(cmd: &LowCmd) -> Self {
        let j = &cmd.joints;
        Self {
            tau_ff: std::array::from_fn(|i| j[i].feedforward_torque),
            q_des: std::array::from_fn(|i| j[i].target_position),
            v_des: std::array::from_fn(|i| j[i].target_velocity),
            kp: std::array::from_fn(|i| j[i].kp),
            kd: std::array::from_fn(|i| j[i].kd),
        }
    }
}
