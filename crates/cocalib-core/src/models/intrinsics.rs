//! Intrinsic parameters of the omnidirectional camera.

use crate::{CoreError, CoreResult, Mat2, Real, Vec2};
use serde::{Deserialize, Serialize};

/// Radial polynomial, affine correction and principal point.
///
/// Vector layout used by the optimizer and the result records:
/// `[u0, v0, a0, a1, a2, a3, a4, c, d, e]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OmniIntrinsics {
    pub u0: Real,
    pub v0: Real,
    pub a0: Real,
    pub a1: Real,
    pub a2: Real,
    pub a3: Real,
    pub a4: Real,
    pub c: Real,
    pub d: Real,
    pub e: Real,
}

impl Default for OmniIntrinsics {
    /// Factory calibration of the 2048x2448 fisheye sensor the pipeline was tuned on.
    fn default() -> Self {
        Self {
            u0: 1022.973079,
            v0: 1200.975472,
            a0: 6.073762e2,
            a1: 0.0,
            a2: -5.487830e-4,
            a3: -2.809080e-9,
            a4: -1.175734e-10,
            c: 1.000143,
            d: -0.000177,
            e: 0.000129,
        }
    }
}

impl OmniIntrinsics {
    pub const DIM: usize = 10;
    pub const NAMES: [&'static str; Self::DIM] =
        ["u0", "v0", "a0", "a1", "a2", "a3", "a4", "c", "d", "e"];

    pub fn to_array(&self) -> [Real; Self::DIM] {
        [
            self.u0, self.v0, self.a0, self.a1, self.a2, self.a3, self.a4, self.c, self.d, self.e,
        ]
    }

    /// Build from `[u0, v0, a0, a1, a2, a3, a4, c, d, e]`.
    pub fn from_slice(v: &[Real]) -> CoreResult<Self> {
        if v.len() != Self::DIM {
            return Err(CoreError::IntrinsicsLength {
                expected: Self::DIM,
                actual: v.len(),
            });
        }
        Ok(Self {
            u0: v[0],
            v0: v[1],
            a0: v[2],
            a1: v[3],
            a2: v[4],
            a3: v[5],
            a4: v[6],
            c: v[7],
            d: v[8],
            e: v[9],
        })
    }

    pub fn principal_point(&self) -> Vec2 {
        Vec2::new(self.u0, self.v0)
    }

    /// Affine distortion matrix `[[c, d], [e, 1]]`.
    pub fn affine(&self) -> Mat2 {
        Mat2::new(self.c, self.d, self.e, 1.0)
    }

    /// Fails when the affine matrix cannot be inverted.
    pub fn validate(&self) -> CoreResult<()> {
        let det = self.affine().determinant();
        if det.abs() < 1e-12 || !det.is_finite() {
            return Err(CoreError::SingularAffine(det));
        }
        Ok(())
    }

    /// Image-plane radius `ρ(θ) = a0 + a1 θ + a2 θ² + a3 θ³ + a4 θ⁴`.
    pub fn radius_at(&self, theta: Real) -> Real {
        self.a0 + theta * (self.a1 + theta * (self.a2 + theta * (self.a3 + theta * self.a4)))
    }

    /// Closed-form inverse height `z(r) = a0 + a2 r² + a3 r³ + a4 r⁴`.
    pub fn height_at(&self, radius: Real) -> Real {
        let r2 = radius * radius;
        self.a0 + self.a2 * r2 + self.a3 * r2 * radius + self.a4 * r2 * r2
    }
}
