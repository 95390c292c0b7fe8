//! Residual factors for co-calibration.

pub mod density;
