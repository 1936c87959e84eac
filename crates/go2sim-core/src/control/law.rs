//! PD + feed-forward joint torque law
//!
//! The one place torque is computed. Both backend variants call this with
//! the pre-step joint state they read from their substrate.

use crate::robot::{JointTargets, NUM_JOINTS};

/// `tau[i] = tau_ff[i] - kp[i]·(q[i] - q_des[i]) - kd[i]·(v[i] - v_des[i])`
#[inline]
pub fn pd_feedforward_torque(
    targets: &JointTargets,
    q: &[f64; NUM_JOINTS],
    v: &[f64; NUM_JOINTS],
) -> [f64; NUM_JOINTS] {
    std::array::from_fn(|i| {
        targets.tau_ff[i]
            - targets.kp[i] * (q[i] - targets.q_des[i])
            - targets.kd[i] * (v[i] - targets.v_des[i])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::LowCmd;
    use approx::assert_relative_eq;

    #[test]
    fn test_neutral_command_gives_zero_torque() {
        let q = [0.3; NUM_JOINTS];
        let v = [-1.0; NUM_JOINTS];
        let tau = pd_feedforward_torque(&LowCmd::neutral().targets(), &q, &v);
        assert_eq!(tau, [0.0; NUM_JOINTS]);
    }

    #[test]
    fn test_per_joint_law() {
        let targets = JointTargets {
            tau_ff: std::array::from_fn(|i| i as f64 * 0.1),
            q_des: std::array::from_fn(|i| 0.5 - i as f64 * 0.05),
            v_des: std::array::from_fn(|i| i as f64 * 0.2),
            kp: std::array::from_fn(|i| 10.0 + i as f64),
            kd: std::array::from_fn(|i| 0.5 + i as f64 * 0.1),
        };
        let q: [f64; NUM_JOINTS] = std::array::from_fn(|i| (i as f64).sin());
        let v: [f64; NUM_JOINTS] = std::array::from_fn(|i| (i as f64).cos());

        let tau = pd_feedforward_torque(&targets, &q, &v);
        for i in 0..NUM_JOINTS {
            let expected = targets.tau_ff[i]
                - targets.kp[i] * (q[i] - targets.q_des[i])
                - targets.kd[i] * (v[i] - targets.v_des[i]);
            assert_eq!(tau[i].to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn test_position_error_drives_back() {
        let targets = LowCmd::hold([0.0; NUM_JOINTS], 20.0, 0.5).targets();
        let tau = pd_feedforward_torque(&targets, &[0.1; NUM_JOINTS], &[0.0; NUM_JOINTS]);
        assert_relative_eq!(tau[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_damping_opposes_velocity() {
        let targets = LowCmd::hold([0.0; NUM_JOINTS], 0.0, 2.0).targets();
        let tau = pd_feedforward_torque(&targets, &[0.0; NUM_JOINTS], &[1.5; NUM_JOINTS]);
        assert_relative_eq!(tau[7], -3.0, epsilon = 1e-12);
    }
}
