//! End-to-end runs: flatten both sensors, then calibrate over the bandwidth schedule.

use crate::camera::{camera_edges, flatten_camera, CameraEdges};
use crate::config::{CocalibConfig, CocalibInput, LidarSource};
use crate::io::{self, bandwidth_tag, OutputDir, ResultRecord};
use crate::lidar::{flatten_lidar, lidar_edges};
use anyhow::{anyhow, ensure, Context, Result};
use cocalib_core::{
    estimate_density, render_fusion, DensityConfig, EdgeDistance, OmniCamera, OmniIntrinsics,
    RasterPurpose, RasterSpec, RasterStats, Real, Vec3,
};
use cocalib_optim::{optimize_cocalib, sweep_cost, CalibParams, CocalibDataset, ParamBounds};
use image::RgbImage;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const REPORT_FILE: &str = "cocalib_report.json";

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Raster and lookup counters of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeDiagnostics {
    pub raster: RasterStats,
    pub edge_pixels: usize,
    pub invalid_lookups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub camera_skipped_pixels: usize,
    pub camera: EdgeDiagnostics,
    /// `None` when registered edge points were given directly.
    pub lidar: Option<EdgeDiagnostics>,
    pub lidar_edge_points: usize,
    pub camera_fisheye_edges: usize,
}

/// Result of one bandwidth stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub bandwidth: Real,
    pub initial_cost: Real,
    pub final_cost: Real,
    pub converged: bool,
    pub projection_error: EdgeDistance,
    /// External layout `[rx, ry, rz, tx, ty, tz, u0, v0, a0..a4, c, d, e]`.
    pub params: Vec<Real>,
    pub sensitivity_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocalibReport {
    pub run_id: String,
    pub initial: Vec<Real>,
    pub stages: Vec<StageReport>,
    pub final_params: Vec<Real>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenReport {
    pub run_id: String,
    pub camera_image: String,
    pub camera: RasterStats,
    pub lidar_image: Option<String>,
    pub lidar: Option<RasterStats>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_raw_camera(input: &CocalibInput, config: &CocalibConfig) -> Result<RgbImage> {
    let image = io::load_rgb(&input.camera_image)?;
    let (cols, rows) = image.dimensions();
    ensure!(
        rows as usize == config.sensor.rows && cols as usize == config.sensor.cols,
        "camera image is {}x{}, sensor is configured as {}x{}",
        rows,
        cols,
        config.sensor.rows,
        config.sensor.cols
    );
    Ok(image)
}

/// The image in the orientation the camera model expects.
fn oriented(image: &RgbImage, flip_vertical: bool) -> RgbImage {
    if flip_vertical {
        image::imageops::flip_vertical(image)
    } else {
        image.clone()
    }
}

fn camera_model(config: &CocalibConfig, intrinsics: OmniIntrinsics) -> Result<OmniCamera> {
    Ok(OmniCamera::new(intrinsics, config.raster.inverse_model)?)
}

struct LidarEdgeData {
    points: Vec<Vec3>,
    diagnostics: Option<EdgeDiagnostics>,
}

fn prepare_lidar(
    source: &LidarSource,
    config: &CocalibConfig,
    spec: &RasterSpec,
    out: &OutputDir,
) -> Result<LidarEdgeData> {
    match source {
        LidarSource::EdgePoints { path } => {
            let (points, _) = io::read_points_txt(path)?;
            Ok(LidarEdgeData {
                points,
                diagnostics: None,
            })
        }
        LidarSource::Cloud { path, edge_mask } => {
            let (points, intensities) = io::read_points_txt(path)?;
            let flat = flatten_lidar(&points, intensities.as_deref(), spec)?;
            io::save_image(
                &out.file(&RasterPurpose::Flat.file_name("lidar")),
                &flat.raster.image,
            )?;
            let mask_path = edge_mask
                .as_ref()
                .ok_or_else(|| anyhow!("calibration needs an edge mask for the LiDAR cloud"))?;
            let mask = io::load_mask(mask_path)?;
            let edges = lidar_edges(&flat, &mask, config.edges.threshold)?;
            io::write_edge_pixels(&out.file("lidar_edge_pixels.txt"), &edges.pixels)?;
            Ok(LidarEdgeData {
                diagnostics: Some(EdgeDiagnostics {
                    raster: flat.raster.stats,
                    edge_pixels: edges.pixels.len(),
                    invalid_lookups: edges.invalid_lookups,
                }),
                points: edges.points,
            })
        }
    }
}

struct StageInputs<'a> {
    config: &'a CocalibConfig,
    raw_image: &'a RgbImage,
    camera: &'a CameraEdges,
    lidar_points: &'a [Vec3],
    initial: &'a CalibParams,
    bounds: &'a ParamBounds,
    spec: &'a RasterSpec,
    out: &'a OutputDir,
}

fn run_stage(
    inputs: &StageInputs<'_>,
    start: &CalibParams,
    bandwidth: Real,
) -> Result<(StageReport, CalibParams)> {
    let config = inputs.config;
    let tag = bandwidth_tag(bandwidth);
    let density_cfg = DensityConfig {
        bandwidth,
        scale: config.density.scale,
        rel_error: config.density.rel_error,
    };
    let grid = estimate_density(
        &inputs.camera.density_samples,
        config.sensor.rows,
        config.sensor.cols,
        &density_cfg,
    )?;
    if config.density.write_grid {
        io::write_density(
            &inputs.out.file(&format!("camera_kde_bw_{tag}.txt")),
            &grid,
        )?;
    }

    let radius = config.sensor.effective_radius;
    let dataset = CocalibDataset::new(
        inputs.lidar_points.to_vec(),
        inputs.camera.raw.clone(),
        Arc::new(grid),
        config.density.scale,
        radius,
    )?;
    let result = optimize_cocalib(
        &dataset,
        start,
        inputs.bounds,
        &config.optim.solve,
        &config.optim.solver,
    )?;

    let fusion = render_fusion(
        inputs.raw_image,
        &result.projections,
        &result.params.intrinsics,
        &radius,
    );
    io::save_image(&inputs.out.file(&format!("fusion_image_bw_{tag}.bmp")), &fusion)?;
    if config.raster.flatten_fusion {
        let camera = camera_model(config, result.params.intrinsics)?;
        let flat = flatten_camera(
            &oriented(&fusion, config.sensor.flip_vertical),
            &camera,
            inputs.spec,
        )?;
        io::save_image(
            &inputs
                .out
                .file(&RasterPurpose::Fusion { bandwidth }.file_name("camera")),
            &flat.raster.image,
        )?;
    }

    io::write_result_record(
        &inputs.out.file(&format!("cocalib_bw_{tag}.txt")),
        &ResultRecord {
            bandwidth,
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            projection_error: result.projection_error.mean,
            params: &result.params,
        },
    )?;

    let mut sensitivity_files = Vec::new();
    if config.sensitivity.enabled {
        for specs in &config.sensitivity.sweeps {
            let slice = sweep_cost(&dataset, inputs.initial, &result.params, specs)?;
            let name = io::cost_slice_file_name(&slice, bandwidth);
            io::write_cost_slice(&inputs.out.file(&name), &slice)?;
            sensitivity_files.push(name);
        }
    }

    info!(
        "[{}] bandwidth {}: cost {:.6e} -> {:.6e}, projection error {:?}",
        config.run_id, bandwidth, result.initial_cost, result.final_cost, result.projection_error.mean
    );
    Ok((
        StageReport {
            bandwidth,
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            converged: result.converged,
            projection_error: result.projection_error,
            params: result.params.to_vec(),
            sensitivity_files,
        },
        result.params,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

/// Write the flat raster images the external edge detector runs on.
pub fn flatten_sensors(
    input: &CocalibInput,
    config: &CocalibConfig,
    out_dir: &Path,
) -> Result<FlattenReport> {
    let id = config.run_id.as_str();
    config.validate()?;
    let out = OutputDir::new(out_dir)?;
    let spec = config.raster_spec()?;
    let initial = config.initial_params()?;

    let raw = load_raw_camera(input, config).with_context(|| format!("[{id}] camera image"))?;
    let camera = camera_model(config, initial.intrinsics)?;
    let flat = flatten_camera(&oriented(&raw, config.sensor.flip_vertical), &camera, &spec)
        .with_context(|| format!("[{id}] camera flattening"))?;
    let camera_image = RasterPurpose::Flat.file_name("camera");
    io::save_image(&out.file(&camera_image), &flat.raster.image)?;

    let (lidar_image, lidar) = match &input.lidar {
        LidarSource::EdgePoints { .. } => (None, None),
        LidarSource::Cloud { path, .. } => {
            let (points, intensities) =
                io::read_points_txt(path).with_context(|| format!("[{id}] LiDAR cloud"))?;
            let flat = flatten_lidar(&points, intensities.as_deref(), &spec)
                .with_context(|| format!("[{id}] LiDAR flattening"))?;
            let name = RasterPurpose::Flat.file_name("lidar");
            io::save_image(&out.file(&name), &flat.raster.image)?;
            (Some(name), Some(flat.raster.stats))
        }
    };

    info!("[{id}] flat images written to {}", out.root().display());
    Ok(FlattenReport {
        run_id: config.run_id.clone(),
        camera_image,
        camera: flat.raster.stats,
        lidar_image,
        lidar,
    })
}

/// Calibrate over the configured bandwidth schedule, each stage warm-started from
/// the previous one. Writes all text records, images and the JSON report.
pub fn run_cocalibration(
    input: &CocalibInput,
    config: &CocalibConfig,
    out_dir: &Path,
) -> Result<CocalibReport> {
    let id = config.run_id.as_str();
    config.validate()?;
    let out = OutputDir::new(out_dir)?;
    let spec = config.raster_spec()?;
    let initial = config.initial_params()?;
    let bounds = config.param_bounds()?;

    let raw = load_raw_camera(input, config).with_context(|| format!("[{id}] camera image"))?;
    let camera = camera_model(config, initial.intrinsics)?;
    let flat = flatten_camera(&oriented(&raw, config.sensor.flip_vertical), &camera, &spec)
        .with_context(|| format!("[{id}] camera flattening"))?;
    io::save_image(
        &out.file(&RasterPurpose::Flat.file_name("camera")),
        &flat.raster.image,
    )?;
    let mask_path = input
        .camera_edge_mask
        .as_ref()
        .ok_or_else(|| anyhow!("[{id}] calibration needs camera_edge_mask"))?;
    let mask = io::load_mask(mask_path).with_context(|| format!("[{id}] camera edges"))?;
    let cam_edges = camera_edges(
        &flat,
        &mask,
        config.edges.threshold,
        config.sensor.rows,
        config.sensor.flip_vertical,
    )
    .with_context(|| format!("[{id}] camera edges"))?;
    io::write_edge_pixels(&out.file("camera_edge_pixels.txt"), &cam_edges.pixels)?;
    io::write_fisheye_edges(&out.file("camera_fisheye_edges.txt"), &cam_edges.raw)?;

    let lidar = prepare_lidar(&input.lidar, config, &spec, &out)
        .with_context(|| format!("[{id}] LiDAR edges"))?;
    io::write_points(&out.file("lidar_edge_points.txt"), &lidar.points)?;
    info!(
        "[{id}] {} camera edge pixels, {} LiDAR edge points",
        cam_edges.raw.len(),
        lidar.points.len()
    );

    let inputs = StageInputs {
        config,
        raw_image: &raw,
        camera: &cam_edges,
        lidar_points: &lidar.points,
        initial: &initial,
        bounds: &bounds,
        spec: &spec,
        out: &out,
    };
    let mut current = initial;
    let mut stages = Vec::with_capacity(config.bandwidths.len());
    for &bandwidth in &config.bandwidths {
        let (stage, params) = run_stage(&inputs, &current, bandwidth)
            .with_context(|| format!("[{id}] stage with bandwidth {bandwidth}"))?;
        stages.push(stage);
        current = params;
    }

    let report = CocalibReport {
        run_id: config.run_id.clone(),
        initial: initial.to_vec(),
        stages,
        final_params: current.to_vec(),
        diagnostics: Diagnostics {
            camera_skipped_pixels: flat.skipped_pixels,
            camera: EdgeDiagnostics {
                raster: flat.raster.stats,
                edge_pixels: cam_edges.pixels.len(),
                invalid_lookups: cam_edges.invalid_lookups,
            },
            lidar: lidar.diagnostics,
            lidar_edge_points: lidar.points.len(),
            camera_fisheye_edges: cam_edges.raw.len(),
        },
    };
    io::write_json(&out.file(REPORT_FILE), &report)?;
    Ok(report)
}
