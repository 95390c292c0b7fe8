//! Parameter block definitions for co-calibration.
//!
//! The solver sees three blocks:
//!
//! - **rotation** - unit quaternion `[qx, qy, qz, qw]` on the SO(3) manifold
//! - **translation** - `[tx, ty, tz]`
//! - **intrinsics** - `[u0, v0, a0, a1, a2, a3, a4, c, d, e]`
//!
//! Everything outside the solver uses the 16-entry external layout
//! `[rx, ry, rz, tx, ty, tz, u0, v0, a0, a1, a2, a3, a4, c, d, e]`.

pub mod layout;
pub mod rotation;

pub use layout::*;
