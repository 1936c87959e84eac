//! Small math helpers shared by the backends
//!
//! Built on top of nalgebra; only what the state readout needs.

mod quaternion;

pub use quaternion::Quaternion;

/// Type alias for 3D vectors
pub type Vector3 = nalgebra::Vector3<f64>;

/// Whether every component is finite
#[inline]
pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_finite() {
        assert!(all_finite(&[0.0, 1.0, -2.5]));
        assert!(!all_finite(&[0.0, f64::NAN]));
        assert!(!all_finite(&[f64::INFINITY]));
        assert!(all_finite(&[]));
    }
}
