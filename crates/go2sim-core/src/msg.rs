//! Bus-facing message types
//!
//! These mirror the Unitree `LowCmd`/`LowState` structures on the
//! `/lowcmd` and `/lowstate` topics. Inbound commands arrive as
//! [`LowCmdMsg`] and are validated into a [`LowCmd`] before they can reach
//! the control loop.

use serde::{Deserialize, Serialize};

use crate::robot::{JointCommand, LowCmd, RobotState, NUM_JOINTS};
use crate::{Error, Result};

/// Single motor command as sent on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorCmd {
    /// Motor mode
    pub mode: u8,
    /// Target position (rad)
    pub q: f32,
    /// Target velocity (rad/s)
    pub dq: f32,
    /// Feedforward torque (Nm)
    pub tau: f32,
    /// Position gain
    pub kp: f32,
    /// Velocity gain
    pub kd: f32,
}

impl MotorCmd {
    /// Create a position command
    pub fn position(q: f32, kp: f32, kd: f32) -> Self {
        Self {
            mode: 0x01,
            q,
            kp,
            kd,
            ..Default::default()
        }
    }

    fn is_finite(&self) -> bool {
        self.q.is_finite()
            && self.dq.is_finite()
            && self.tau.is_finite()
            && self.kp.is_finite()
            && self.kd.is_finite()
    }
}

impl From<&MotorCmd> for JointCommand {
    fn from(m: &MotorCmd) -> Self {
        Self {
            target_position: m.q as f64,
            target_velocity: m.dq as f64,
            feedforward_torque: m.tau as f64,
            kp: m.kp as f64,
            kd: m.kd as f64,
        }
    }
}

/// Inbound low-level command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LowCmdMsg {
    /// Message counter
    pub tick: u32,
    /// Sender's logical timestamp in seconds, if it stamps its commands
    #[serde(default)]
    pub stamp: Option<f64>,
    /// Motor commands, canonical joint order
    pub motor_cmd: Vec<MotorCmd>,
}

impl LowCmdMsg {
    /// Build a message from a validated command
    pub fn from_cmd(cmd: &LowCmd, tick: u32) -> Self {
        Self {
            tick,
            stamp: None,
            motor_cmd: cmd
                .joints
                .iter()
                .map(|j| MotorCmd {
                    mode: 0x01,
                    q: j.target_position as f32,
                    dq: j.target_velocity as f32,
                    tau: j.feedforward_torque as f32,
                    kp: j.kp as f32,
                    kd: j.kd as f32,
                })
                .collect(),
        }
    }

    /// Set the logical timestamp
    pub fn with_stamp(mut self, seconds: f64) -> Self {
        self.stamp = Some(seconds);
        self
    }

    /// Validate and convert into a [`LowCmd`]
    ///
    /// Rejects a wrong joint count, any non-finite field, and a negative or
    /// non-finite timestamp.
    pub fn validate(&self) -> Result<LowCmd> {
        if self.motor_cmd.len() != NUM_JOINTS {
            return Err(Error::CommandValidation(format!(
                "expected {} motor commands, got {}",
                NUM_JOINTS,
                self.motor_cmd.len()
            )));
        }
        if let Some(i) = self.motor_cmd.iter().position(|m| !m.is_finite()) {
            return Err(Error::CommandValidation(format!(
                "non-finite value in motor command {}",
                i
            )));
        }
        if let Some(stamp) = self.stamp {
            if !stamp.is_finite() || stamp < 0.0 {
                return Err(Error::CommandValidation(format!(
                    "invalid timestamp {}",
                    stamp
                )));
            }
        }
        Ok(LowCmd {
            joints: std::array::from_fn(|i| JointCommand::from(&self.motor_cmd[i])),
        })
    }
}

/// Single motor state as published on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    /// Motor mode
    pub mode: u8,
    /// Current position (rad)
    pub q: f32,
    /// Current velocity (rad/s)
    pub dq: f32,
}

/// IMU state as published on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuState {
    /// Quaternion orientation [w, x, y, z]
    pub quaternion: [f32; 4],
}

/// Outbound low-level state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LowState {
    /// Step count that produced this state
    pub tick: u64,
    /// Motor states for all 12 joints
    pub motor_state: [MotorState; NUM_JOINTS],
    /// IMU state
    pub imu_state: ImuState,
}

impl LowState {
    /// Build the outbound message from a state snapshot
    pub fn from_robot_state(state: &RobotState, tick: u64) -> Self {
        let joints = state.joints();
        let q = state.base().orientation.to_wxyz();
        Self {
            tick,
            motor_state: std::array::from_fn(|i| MotorState {
                mode: joints[i].mode,
                q: joints[i].position as f32,
                dq: joints[i].velocity as f32,
            }),
            imu_state: ImuState {
                quaternion: q.map(|c| c as f32),
            },
        }
    }

    /// Get joint positions as array
    pub fn joint_positions(&self) -> [f32; NUM_JOINTS] {
        std::array::from_fn(|i| self.motor_state[i].q)
    }
}
