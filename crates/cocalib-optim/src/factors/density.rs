//! Density-field residual for one LiDAR edge point.

use cocalib_core::{project_omni, BicubicInterpolator, DensityGrid, Vec3};
use nalgebra::{DVector, Quaternion, RealField, UnitQuaternion, Vector3};
use std::sync::Arc;
use tiny_solver::factors::Factor;

/// The scalar residual is replicated over this many outputs, matching the
/// quaternion block's weight against translation and intrinsics.
pub const RESIDUAL_DIM: usize = 3;

/// `weight · (reference − density(scale · project(R p + t)))`.
#[derive(Debug, Clone)]
pub struct DensityFactor {
    pub point: Vec3,
    pub weight: f64,
    pub reference: f64,
    pub scale: f64,
    pub grid: Arc<DensityGrid>,
}

impl DensityFactor {
    fn residual_generic<T: RealField>(
        &self,
        rot: &DVector<T>,
        trans: &DVector<T>,
        intr: &DVector<T>,
    ) -> DVector<T> {
        debug_assert!(rot.len() == 4, "rotation must have 4 params");
        debug_assert!(trans.len() == 3, "translation must have 3 params");

        let q = UnitQuaternion::from_quaternion(Quaternion::new(
            rot[3].clone(),
            rot[0].clone(),
            rot[1].clone(),
            rot[2].clone(),
        ));
        let t = Vector3::new(trans[0].clone(), trans[1].clone(), trans[2].clone());
        let p = Vector3::new(
            T::from_f64(self.point.x).unwrap(),
            T::from_f64(self.point.y).unwrap(),
            T::from_f64(self.point.z).unwrap(),
        );
        let pc = q * p + t;
        let px = project_omni(intr.as_slice(), &pc);

        let scale = T::from_f64(self.scale).unwrap();
        let val = BicubicInterpolator::new(&self.grid)
            .evaluate(px.x.clone() * scale.clone(), px.y.clone() * scale);
        let reference = T::from_f64(self.reference).unwrap();
        let res = T::from_f64(self.weight).unwrap() * (reference - val);
        DVector::from_element(RESIDUAL_DIM, res)
    }

    /// Residual at plain `f64` parameters.
    pub fn evaluate(&self, rot: &DVector<f64>, trans: &DVector<f64>, intr: &DVector<f64>) -> f64 {
        self.residual_generic(rot, trans, intr)[0]
    }
}

impl<T: RealField> Factor<T> for DensityFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(
            params.len(),
            3,
            "expected [rotation, translation, intrinsics] parameter blocks"
        );
        self.residual_generic(&params[0], &params[1], &params[2])
    }
}
