//! Omnidirectional (fisheye) camera model.
//!
//! Forward: `θ = acos(z / ‖p‖)`, `ρ = a0 + a1 θ + … + a4 θ⁴`,
//! `q = ρ · (x, y) / ‖(x, y)‖ + (u0, v0)`, `pixel = A⁻¹ q` with `A = [[c, d], [e, 1]]`.
//!
//! Inverse: `(x, y) = A · pixel − (u0, v0)`, `r = ‖(x, y)‖`, then `θ` from either the
//! closed-form height polynomial or a spline inverse of `ρ(θ)`.

use crate::{wrap_two_pi, CoreResult, OmniIntrinsics, RadiusSpline, Real, Vec2, Vec3};
use nalgebra::{RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Project a camera-frame point with intrinsics `[u0, v0, a0, a1, a2, a3, a4, c, d, e]`.
///
/// Generic over `RealField` so the same code runs on `f64` and on autodiff duals.
/// A point on the optical axis maps to the principal point.
pub fn project_omni<T: RealField>(k: &[T], p: &Vector3<T>) -> Vector2<T> {
    debug_assert!(k.len() >= OmniIntrinsics::DIM, "omni intrinsics need 10 params");
    let (u0, v0) = (k[0].clone(), k[1].clone());
    let (c, d, e) = (k[7].clone(), k[8].clone(), k[9].clone());

    let r2 = p.x.clone() * p.x.clone() + p.y.clone() * p.y.clone();
    let norm = (r2.clone() + p.z.clone() * p.z.clone()).sqrt();
    let (qx, qy) = if r2 > T::zero() {
        let r_xy = r2.sqrt();
        let theta = (p.z.clone() / norm).acos();
        let rho = k[2].clone()
            + theta.clone()
                * (k[3].clone()
                    + theta.clone()
                        * (k[4].clone()
                            + theta.clone() * (k[5].clone() + theta * k[6].clone())));
        (
            rho.clone() * p.x.clone() / r_xy.clone() + u0,
            rho * p.y.clone() / r_xy + v0,
        )
    } else {
        (u0, v0)
    };

    let det = c.clone() - d.clone() * e.clone();
    let u = (qx.clone() - d * qy.clone()) / det.clone();
    let v = (c * qy - e * qx) / det;
    Vector2::new(u, v)
}

/// Polar angle from the optical axis and azimuth in `[0, 2π)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalDir {
    pub theta: Real,
    pub phi: Real,
}

impl SphericalDir {
    /// Direction of a non-zero vector; `None` at the origin.
    pub fn from_vector(p: &Vec3) -> Option<Self> {
        let norm = p.norm();
        if norm == 0.0 || !norm.is_finite() {
            return None;
        }
        Some(Self {
            theta: (p.z / norm).clamp(-1.0, 1.0).acos(),
            phi: wrap_two_pi(p.y.atan2(p.x)),
        })
    }

    pub fn to_unit_vector(&self) -> Vec3 {
        let (st, ct) = self.theta.sin_cos();
        let (sp, cp) = self.phi.sin_cos();
        Vec3::new(st * cp, st * sp, ct)
    }
}

/// Which inverse of the radial model to use when lifting pixels to the sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InverseModelKind {
    /// `z = a0 + a2 r² + a3 r³ + a4 r⁴`, the legacy rasterization model.
    #[default]
    Polynomial,
    /// Spline inverse of `ρ(θ)`; consistent with [`project_omni`].
    Spline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InverseModel {
    Polynomial,
    Spline(RadiusSpline),
}

/// Camera with a fixed set of intrinsics and a prepared inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct OmniCamera {
    intrinsics: OmniIntrinsics,
    params: [Real; OmniIntrinsics::DIM],
    inverse: InverseModel,
}

impl OmniCamera {
    pub fn new(intrinsics: OmniIntrinsics, kind: InverseModelKind) -> CoreResult<Self> {
        intrinsics.validate()?;
        let inverse = match kind {
            InverseModelKind::Polynomial => InverseModel::Polynomial,
            InverseModelKind::Spline => InverseModel::Spline(RadiusSpline::fit(&intrinsics)?),
        };
        Ok(Self {
            intrinsics,
            params: intrinsics.to_array(),
            inverse,
        })
    }

    pub fn intrinsics(&self) -> &OmniIntrinsics {
        &self.intrinsics
    }

    pub fn inverse(&self) -> &InverseModel {
        &self.inverse
    }

    pub fn project(&self, p: &Vec3) -> Vec2 {
        project_omni(&self.params, p)
    }

    /// Lift a pixel to a viewing direction. `None` when the pixel sits exactly on the
    /// principal point, where the azimuth is undefined.
    pub fn unproject(&self, pixel: &Vec2) -> Option<SphericalDir> {
        let k = &self.intrinsics;
        let x = k.c * pixel.x + k.d * pixel.y - k.u0;
        let y = k.e * pixel.x + pixel.y - k.v0;
        let radius = (x * x + y * y).sqrt();
        if radius == 0.0 {
            return None;
        }
        let theta = match &self.inverse {
            InverseModel::Polynomial => {
                let z = k.height_at(radius);
                let norm = (radius * radius + z * z).sqrt();
                (z / norm).clamp(-1.0, 1.0).acos()
            }
            InverseModel::Spline(spline) => spline.evaluate(radius),
        };
        Some(SphericalDir {
            theta,
            phi: wrap_two_pi(y.atan2(x)),
        })
    }
}
