//! Raw base-orientation quaternion
//!
//! Backends emit orientation as `(x, y, z, w)`. The components are stored
//! exactly as emitted: no normalization, no sign convention. Conversion to a
//! rotation normalizes on the fly.

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use super::Vector3;

/// A quaternion in backend order `(x, y, z, w)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
    /// Scalar component (w)
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create from raw components, kept as given
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Identity quaternion (no rotation)
    pub const fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Create from a `[x, y, z, w]` slice as found in generalized coordinates
    pub fn from_xyzw(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    /// Components in backend order `[x, y, z, w]`
    pub fn to_xyzw(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Components in bus order `[w, x, y, z]`
    pub fn to_wxyz(&self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Whether all components are finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// Convert to nalgebra's UnitQuaternion (normalizes)
    pub fn to_nalgebra(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(self.w, self.x, self.y, self.z))
    }

    /// Rotate a vector by this orientation
    pub fn rotate(&self, v: [f64; 3]) -> [f64; 3] {
        let r = self.to_nalgebra() * Vector3::new(v[0], v[1], v[2]);
        [r.x, r.y, r.z]
    }
}
