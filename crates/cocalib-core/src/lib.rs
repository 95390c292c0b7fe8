//! Core geometry and density primitives for LiDAR / omnidirectional camera co-calibration.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Vec3`, ...),
//! - the omnidirectional camera model (forward projection, polynomial and spline inverses),
//! - spherical point clouds and the equirectangular rasterizer with per-cell provenance,
//! - edge pixel sets, kernel density fields and their bicubic interpolation,
//! - edge projection, fusion rendering and the edge-to-edge distance metric.
//!
//! Pixel coordinates are `(u, v)` with `u` along image rows and `v` along image columns.
//! Camera pipeline:
//! `pixel = A⁻¹ · (ρ(θ) · dir(x, y) + (u0, v0))`

pub mod density;
pub mod edges;
pub mod error;
pub mod interpolation;
/// Linear algebra type aliases.
pub mod math;
pub mod metrics;
/// Camera intrinsics, extrinsics and the omnidirectional projection model.
pub mod models;
pub mod projector;
pub mod raster;
pub mod sphere;

pub use density::*;
pub use edges::*;
pub use error::*;
pub use interpolation::*;
pub use math::*;
pub use metrics::*;
pub use models::*;
pub use projector::*;
pub use raster::*;
pub use sphere::*;
