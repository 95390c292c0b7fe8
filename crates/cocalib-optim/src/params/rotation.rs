//! Quaternion parameter block conversions.

use anyhow::{ensure, Result};
use cocalib_core::Real;
use nalgebra::{DVector, DVectorView, Quaternion, UnitQuaternion};

/// Convert a rotation to `[qx, qy, qz, qw]`.
pub fn quat_to_dvec(q: &UnitQuaternion<Real>) -> DVector<f64> {
    let q = q.quaternion();
    nalgebra::dvector![q.i, q.j, q.k, q.w]
}

/// Convert `[qx, qy, qz, qw]` back to a (renormalized) rotation.
pub fn dvec_to_quat(v: DVectorView<'_, f64>) -> Result<UnitQuaternion<Real>> {
    ensure!(v.len() == 4, "rotation block must have 4 entries, got {}", v.len());
    let q = Quaternion::new(v[3], v[0], v[1], v[2]);
    ensure!(q.norm() > 1e-12, "rotation block has zero norm");
    Ok(UnitQuaternion::from_quaternion(q))
}
