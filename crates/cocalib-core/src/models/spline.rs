//! Natural cubic spline used to invert the radial polynomial `ρ(θ)`.

use crate::{CoreError, CoreResult, OmniIntrinsics, Real};

/// Angular sampling step used when fitting the inverse spline.
pub const SPLINE_STEP_RAD: Real = std::f64::consts::PI / 360.0;

/// Natural cubic spline `θ(r)` with linear extrapolation outside the knots.
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusSpline {
    knots: Vec<Real>,
    values: Vec<Real>,
    second: Vec<Real>,
}

impl RadiusSpline {
    /// Fit over `(ρ(θ), θ)` for `θ ∈ [0, π]`, keeping the strictly increasing prefix of `ρ`.
    pub fn fit(intrinsics: &OmniIntrinsics) -> CoreResult<Self> {
        let steps = (std::f64::consts::PI / SPLINE_STEP_RAD).round() as usize;
        let mut knots = Vec::with_capacity(steps + 1);
        let mut values = Vec::with_capacity(steps + 1);
        for k in 0..=steps {
            let theta = k as Real * SPLINE_STEP_RAD;
            let rho = intrinsics.radius_at(theta);
            if let Some(&last) = knots.last() {
                if rho <= last {
                    break;
                }
            }
            knots.push(rho);
            values.push(theta);
        }
        Self::from_samples(knots, values)
    }

    /// Interpolating spline through strictly increasing `knots`.
    pub fn from_samples(knots: Vec<Real>, values: Vec<Real>) -> CoreResult<Self> {
        if knots.len() < 2 || knots.len() != values.len() {
            return Err(CoreError::NonMonotonicRadius);
        }
        if knots.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(CoreError::NonMonotonicRadius);
        }
        let second = natural_second_derivatives(&knots, &values);
        Ok(Self {
            knots,
            values,
            second,
        })
    }

    /// Knot range `[r_min, r_max]`.
    pub fn domain(&self) -> (Real, Real) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }

    pub fn evaluate(&self, r: Real) -> Real {
        let n = self.knots.len();
        let (lo, hi) = self.domain();
        if r <= lo {
            return self.values[0] + self.slope_at(0) * (r - lo);
        }
        if r >= hi {
            return self.values[n - 1] + self.slope_at(n - 1) * (r - hi);
        }
        let i = self.knots.partition_point(|&k| k <= r).saturating_sub(1).min(n - 2);
        let h = self.knots[i + 1] - self.knots[i];
        let a = (self.knots[i + 1] - r) / h;
        let b = (r - self.knots[i]) / h;
        a * self.values[i]
            + b * self.values[i + 1]
            + ((a * a * a - a) * self.second[i] + (b * b * b - b) * self.second[i + 1]) * h * h
                / 6.0
    }

    fn slope_at(&self, idx: usize) -> Real {
        let n = self.knots.len();
        if idx == 0 {
            let h = self.knots[1] - self.knots[0];
            (self.values[1] - self.values[0]) / h
                - h * (2.0 * self.second[0] + self.second[1]) / 6.0
        } else {
            let h = self.knots[n - 1] - self.knots[n - 2];
            (self.values[n - 1] - self.values[n - 2]) / h
                + h * (2.0 * self.second[n - 1] + self.second[n - 2]) / 6.0
        }
    }
}

/// Tridiagonal solve for the second derivatives with `M_0 = M_{n-1} = 0`.
fn natural_second_derivatives(x: &[Real], y: &[Real]) -> Vec<Real> {
    let n = x.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }
    let mut c_prime = vec![0.0; n];
    let mut d_prime = vec![0.0; n];
    for i in 1..n - 1 {
        let h0 = x[i] - x[i - 1];
        let h1 = x[i + 1] - x[i];
        let diag = 2.0 * (h0 + h1);
        let rhs = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
        let denom = diag - h0 * c_prime[i - 1];
        c_prime[i] = h1 / denom;
        d_prime[i] = (rhs - h0 * d_prime[i - 1]) / denom;
    }
    for i in (1..n - 1).rev() {
        m[i] = d_prime[i] - c_prime[i] * m[i + 1];
    }
    m
}
