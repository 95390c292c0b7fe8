//! Non-linear calibration of LiDAR-to-fisheye extrinsics and intrinsics on tiny-solver.
//!
//! LiDAR edge points are transformed, projected through the omnidirectional model and
//! scored against a kernel density field built from camera edges. The crate provides:
//! - structured parameter blocks with a single Euler/quaternion boundary,
//! - the density residual factor (generic over autodiff scalars),
//! - the calibration problem builder/solver and the cost-surface sensitivity sweeps.

pub mod factors;
pub mod params;
pub mod problems;
pub mod solver;

pub use crate::params::{CalibParams, ParamBlock, ParamBounds};
pub use crate::problems::cocalibration::*;
pub use crate::problems::sensitivity::*;
pub use crate::solver::tiny::TinySolveOptions;
