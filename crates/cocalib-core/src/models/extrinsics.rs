//! LiDAR-to-camera rigid transform.
//!
//! Rotation is held as a unit quaternion. The Euler/translation form
//! `[rx, ry, rz, tx, ty, tz]` with `R = Rz(rz) · Ry(ry) · Rx(rx)` exists only at
//! the I/O boundary, through [`Extrinsics::from_euler_translation`] and
//! [`Extrinsics::to_euler_translation`].

use crate::{Iso3, Real, Vec3};
use nalgebra::{Quaternion, Translation3, UnitQuaternion};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrinsics {
    pub rotation: UnitQuaternion<Real>,
    pub translation: Vec3,
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

impl Extrinsics {
    pub const DIM: usize = 6;
    pub const NAMES: [&'static str; Self::DIM] = ["rx", "ry", "rz", "tx", "ty", "tz"];

    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vec3::zeros(),
        }
    }

    pub fn from_euler_translation(v: [Real; Self::DIM]) -> Self {
        Self {
            rotation: UnitQuaternion::from_euler_angles(v[0], v[1], v[2]),
            translation: Vec3::new(v[3], v[4], v[5]),
        }
    }

    pub fn to_euler_translation(&self) -> [Real; Self::DIM] {
        let (rx, ry, rz) = self.rotation.euler_angles();
        [
            rx,
            ry,
            rz,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    /// Quaternion as `[qx, qy, qz, qw]`.
    pub fn quaternion_xyzw(&self) -> [Real; 4] {
        let q = self.rotation.quaternion();
        [q.i, q.j, q.k, q.w]
    }

    /// Build from `[qx, qy, qz, qw]` (renormalized) and a translation.
    pub fn from_quaternion_xyzw(q: [Real; 4], translation: Vec3) -> Self {
        Self {
            rotation: UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2])),
            translation,
        }
    }

    pub fn to_isometry(&self) -> Iso3 {
        Iso3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    /// Map a LiDAR-frame point into the camera frame.
    pub fn transform_point(&self, p: &Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }
}
