//! Bicubic (Catmull-Rom) interpolation of a [`DensityGrid`].
//!
//! The interpolant is C¹, passes through the grid values and clamps indices at the
//! borders. Coordinates are grid indices: `(row, col)` in `[0, n_rows) x [0, n_cols)`.

use crate::DensityGrid;
use nalgebra::RealField;

/// Cubic Hermite segment through `p1`, `p2` with Catmull-Rom tangents, at `x ∈ [0, 1]`.
fn cubic_hermite<T: RealField>(p0: T, p1: T, p2: T, p3: T, x: T) -> T {
    let half = T::from_f64(0.5).unwrap();
    let two = T::from_f64(2.0).unwrap();
    let three = T::from_f64(3.0).unwrap();
    let four = T::from_f64(4.0).unwrap();
    let five = T::from_f64(5.0).unwrap();

    let a = half.clone()
        * (-p0.clone() + three.clone() * p1.clone() - three * p2.clone() + p3.clone());
    let b = half.clone() * (two * p0.clone() - five * p1.clone() + four * p2.clone() - p3);
    let c = half * (-p0 + p2);
    let d = p1;
    ((a * x.clone() + b) * x.clone() + c) * x + d
}

/// Integer cell and fractional offset of `x` on an axis of `len` nodes.
///
/// The split is taken on the real part so autodiff scalars keep their derivative
/// in the offset. Cells are clamped to `[-2, len]`, where all four stencil nodes
/// already collapse onto the border node.
fn split_cell<T: RealField>(x: T, len: usize) -> (i64, T) {
    let re: f64 = nalgebra::convert_unchecked(x.clone());
    let hi = len as f64;
    if re.is_nan() || re < -2.0 {
        return (-2, T::zero());
    }
    if re >= hi {
        return (len as i64, T::zero());
    }
    let cell = re.floor();
    (cell as i64, x - T::from_f64(cell).unwrap())
}

/// Read-only bicubic view over a density grid.
#[derive(Debug, Clone, Copy)]
pub struct BicubicInterpolator<'a> {
    grid: &'a DensityGrid,
}

impl<'a> BicubicInterpolator<'a> {
    pub fn new(grid: &'a DensityGrid) -> Self {
        Self { grid }
    }

    fn sample<T: RealField>(&self, row: i64, col: i64) -> T {
        let r = row.clamp(0, self.grid.n_rows() as i64 - 1) as usize;
        let c = col.clamp(0, self.grid.n_cols() as i64 - 1) as usize;
        T::from_f64(self.grid.get(r, c)).unwrap()
    }

    /// Interpolated value at fractional grid position `(row, col)`.
    ///
    /// Positions more than one cell outside the grid, and non-finite positions,
    /// read the clamped border value with zero derivative.
    pub fn evaluate<T: RealField>(&self, row: T, col: T) -> T {
        let (n, fr) = split_cell(row, self.grid.n_rows());
        let (m, fc) = split_cell(col, self.grid.n_cols());

        let along_cols = |r: i64| {
            cubic_hermite(
                self.sample::<T>(r, m - 1),
                self.sample::<T>(r, m),
                self.sample::<T>(r, m + 1),
                self.sample::<T>(r, m + 2),
                fc.clone(),
            )
        };
        cubic_hermite(
            along_cols(n - 1),
            along_cols(n),
            along_cols(n + 1),
            along_cols(n + 2),
            fr,
        )
    }
}
