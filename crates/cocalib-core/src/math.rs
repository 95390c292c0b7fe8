use nalgebra::{Isometry3, Matrix2, Matrix3, Point2, Point3, SVector, Vector2, Vector3};

pub type Real = f64;

pub type Vec2 = Vector2<Real>;
pub type Vec3 = Vector3<Real>;
pub type VecN<const D: usize> = SVector<Real, D>;
pub type Pt2 = Point2<Real>;
pub type Pt3 = Point3<Real>;
pub type Mat2 = Matrix2<Real>;
pub type Mat3 = Matrix3<Real>;
pub type Iso3 = Isometry3<Real>;

/// Wrap an angle into `[0, 2π)`.
pub fn wrap_two_pi(angle: Real) -> Real {
    let wrapped = angle.rem_euclid(std::f64::consts::TAU);
    // rem_euclid may round up to exactly TAU for tiny negative inputs
    if wrapped >= std::f64::consts::TAU {
        0.0
    } else {
        wrapped
    }
}

/// `n` evenly spaced samples over `[start, end]`; a single sample sits at `start`.
pub fn linspace(start: Real, end: Real, n: usize) -> Vec<Real> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as Real;
            let mut out: Vec<Real> = (0..n).map(|i| start + step * i as Real).collect();
            out[n - 1] = end;
            out
        }
    }
}
