//! File-driven LiDAR / fisheye camera co-calibration.
//!
//! A run reads a raw camera image, edge masks produced by an external detector on
//! the flat rasters, and LiDAR edge points (given directly or recovered from a
//! dense cloud). It then refines the extrinsics (and optionally intrinsics) once per
//! bandwidth of a decreasing schedule.
//!
//! Two entry points:
//! - [`flatten_sensors`] writes the flat raster images the edge detector runs on,
//! - [`run_cocalibration`] calibrates and writes text records, fusion images,
//!   optional sensitivity slices and a JSON [`CocalibReport`].

pub mod camera;
pub mod config;
pub mod io;
pub mod lidar;
pub mod run;

pub use config::*;
pub use run::{
    flatten_sensors, run_cocalibration, CocalibReport, Diagnostics, EdgeDiagnostics,
    FlattenReport, StageReport, REPORT_FILE,
};
