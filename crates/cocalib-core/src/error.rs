//! Precondition failures raised by the core algorithms.
//!
//! Local degeneracies (raster search misses, out-of-range tags, empty lookups)
//! are never errors; they are counted in the per-stage statistics instead.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("edge pixel set is empty")]
    EmptyEdgeSet,
    #[error("point cloud is empty")]
    EmptyCloud,
    #[error(
        "image size {actual_rows}x{actual_cols} does not match the declared {expected_rows}x{expected_cols}"
    )]
    ImageSizeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },
    #[error("kernel bandwidth must be positive and finite (got {0})")]
    InvalidBandwidth(f64),
    #[error("grid scale must be positive and finite (got {0})")]
    InvalidScale(f64),
    #[error("relative error tolerance must lie in [0, 1) (got {0})")]
    InvalidRelError(f64),
    #[error("raster needs at least 2 columns (got {0})")]
    InvalidRasterCols(usize),
    #[error("expected {expected} intrinsic parameters, got {actual}")]
    IntrinsicsLength { expected: usize, actual: usize },
    #[error("affine matrix [[c, d], [e, 1]] is singular (det = {0})")]
    SingularAffine(f64),
    #[error("radial polynomial is not increasing near theta = 0; spline inverse unavailable")]
    NonMonotonicRadius,
    #[error("edge pixel ({row}, {col}) lies outside the {rows}x{cols} raster")]
    EdgeOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("{what}: expected {expected} entries, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
