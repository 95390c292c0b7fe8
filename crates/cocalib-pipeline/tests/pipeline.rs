//! End-to-end runs on a small synthetic sensor pair.
//!
//! The camera sees through a 60x60 fisheye with a linear radius profile; the LiDAR
//! edge points are the viewing directions of the masked raster cells, so the
//! identity extrinsics are the exact answer.

use cocalib_core::{
    EffectiveRadius, Extrinsics, InverseModelKind, OmniCamera, OmniIntrinsics, RasterSpec,
    SphericalDir, Vec2, Vec3,
};
use cocalib_optim::{CalibParams, SweepSpec};
use cocalib_pipeline::*;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::Path;

const SIZE: usize = 60;
const RASTER_COLS: usize = 60;

fn intrinsics() -> OmniIntrinsics {
    OmniIntrinsics {
        u0: 30.0,
        v0: 30.0,
        a0: 0.0,
        a1: 20.0,
        a2: 0.0,
        a3: 0.0,
        a4: 0.0,
        c: 1.0,
        d: 0.0,
        e: 0.0,
    }
}

/// A ring at raster row 8 plus a radial segment in column 10.
fn edge_cells() -> Vec<(usize, usize)> {
    let mut cells: Vec<(usize, usize)> = (0..RASTER_COLS).map(|c| (8, c)).collect();
    cells.extend((3..=12).filter(|r| *r != 8).map(|r| (r, 10)));
    cells
}

fn config() -> CocalibConfig {
    let mut cfg = CocalibConfig {
        run_id: "synthetic".into(),
        bandwidths: vec![8.0, 4.0],
        initial: CalibParams::new(Extrinsics::identity(), intrinsics()).to_vec(),
        ..CocalibConfig::default()
    };
    cfg.sensor.rows = SIZE;
    cfg.sensor.cols = SIZE;
    cfg.sensor.flip_vertical = false;
    cfg.sensor.effective_radius = EffectiveRadius {
        inner: 2.0,
        outer: 29.0,
    };
    cfg.raster.cols = RASTER_COLS;
    cfg.raster.inverse_model = InverseModelKind::Spline;
    cfg.density.rel_error = 0.0;
    cfg.optim.solve.lock_intrinsics = true;
    cfg.optim.solve.q_lim = 0.02;
    cfg
}

fn edge_mask(spec: &RasterSpec) -> GrayImage {
    let mut mask = GrayImage::new(spec.cols as u32, spec.rows as u32);
    for &(r, c) in &edge_cells() {
        mask.put_pixel(c as u32, r as u32, Luma([255]));
    }
    mask
}

fn points_text(points: &[Vec3]) -> String {
    points
        .iter()
        .map(|p| format!("{} {} {}\n", p.x, p.y, p.z))
        .collect()
}

fn write_inputs(dir: &Path) -> CocalibInput {
    let image = RgbImage::from_fn(SIZE as u32, SIZE as u32, |x, y| {
        Rgb([(x * 4) as u8, (y * 4) as u8, 128])
    });
    let image_path = dir.join("camera.png");
    image.save(&image_path).unwrap();

    let spec = RasterSpec::from_cols(RASTER_COLS).unwrap();
    let points: Vec<Vec3> = edge_cells()
        .iter()
        .enumerate()
        .map(|(i, &(r, c))| {
            let (theta, phi) = spec.cell_center(r, c);
            SphericalDir { theta, phi }.to_unit_vector() * (2.0 + (i % 3) as f64)
        })
        .collect();
    let mask_path = dir.join("camera_edges.png");
    edge_mask(&spec).save(&mask_path).unwrap();
    let points_path = dir.join("lidar_edges.txt");
    fs::write(&points_path, points_text(&points)).unwrap();

    CocalibInput {
        camera_image: image_path,
        camera_edge_mask: Some(mask_path),
        lidar: LidarSource::EdgePoints { path: points_path },
    }
}

#[test]
fn calibration_writes_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_inputs(dir.path());
    let mut cfg = config();
    cfg.sensitivity.enabled = true;
    cfg.sensitivity.sweeps = vec![vec![SweepSpec {
        param: 3,
        half_steps: 2,
        step: 0.01,
    }]];
    let out = dir.path().join("out");

    let report = run_cocalibration(&input, &cfg, &out).unwrap();

    assert_eq!(report.run_id, "synthetic");
    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.diagnostics.lidar_edge_points, edge_cells().len());
    assert_eq!(report.diagnostics.camera.edge_pixels, edge_cells().len());
    assert!(report.diagnostics.lidar.is_none());
    for stage in &report.stages {
        assert!(
            stage.final_cost <= stage.initial_cost + 1e-12,
            "bandwidth {}: {} -> {}",
            stage.bandwidth,
            stage.initial_cost,
            stage.final_cost
        );
        let err = stage.projection_error.mean.unwrap();
        assert!(err < 2.0, "projection error {err}");
        assert_eq!(stage.params.len(), CalibParams::DIM);
        assert_eq!(stage.sensitivity_files.len(), 1);
    }
    assert_eq!(report.final_params, report.stages[1].params);

    for name in [
        "camera_flat.bmp",
        "camera_edge_pixels.txt",
        "camera_fisheye_edges.txt",
        "lidar_edge_points.txt",
        "cocalib_bw_8.txt",
        "cocalib_bw_4.txt",
        "fusion_image_bw_8.bmp",
        "fusion_image_bw_4.bmp",
        "tx_bw_8_result.txt",
        "tx_bw_4_result.txt",
        REPORT_FILE,
    ] {
        assert!(out.join(name).is_file(), "missing {name}");
    }

    let slice = fs::read_to_string(out.join("tx_bw_4_result.txt")).unwrap();
    assert_eq!(slice.lines().count(), 1 + 5);

    let json = fs::read_to_string(out.join(REPORT_FILE)).unwrap();
    let parsed: CocalibReport = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.stages.len(), 2);

    let fusion = image::open(out.join("fusion_image_bw_4.bmp"))
        .unwrap()
        .to_rgb8();
    assert_eq!(fusion.dimensions(), (SIZE as u32, SIZE as u32));
    assert!(fusion.pixels().any(|p| p.0 == [0, 255, 0]));
}

#[test]
fn flatten_writes_flat_images() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_inputs(dir.path());
    let cloud_path = dir.path().join("cloud.txt");
    fs::write(&cloud_path, "1 0 1 10\n0 1 1 20\n-1 0 1 30\n0 -1 -1 40\n").unwrap();
    input.lidar = LidarSource::Cloud {
        path: cloud_path,
        edge_mask: None,
    };
    let out = dir.path().join("flat");

    let report = flatten_sensors(&input, &config(), &out).unwrap();

    assert_eq!(report.camera_image, "camera_flat.bmp");
    assert_eq!(report.lidar_image.as_deref(), Some("lidar_flat.bmp"));
    let flat = image::open(out.join("camera_flat.bmp")).unwrap().to_rgb8();
    assert_eq!(flat.dimensions(), (RASTER_COLS as u32, (RASTER_COLS / 2) as u32));
    assert!(out.join("lidar_flat.bmp").is_file());
    assert!(report.lidar.unwrap().invalid_searches > 0);
}

#[test]
fn mismatched_image_size_names_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_inputs(dir.path());
    let mut cfg = config();
    cfg.sensor.rows = SIZE + 1;
    let err = run_cocalibration(&input, &cfg, &dir.path().join("out")).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("synthetic"), "{msg}");
    assert!(msg.contains("61x60"), "{msg}");
}

#[test]
fn calibration_requires_camera_mask() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_inputs(dir.path());
    input.camera_edge_mask = None;
    assert!(run_cocalibration(&input, &config(), &dir.path().join("out")).is_err());
}

#[test]
fn flipped_camera_matches_raw_frame_edges() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_inputs(dir.path());
    let mut cfg = config();
    cfg.sensor.flip_vertical = true;

    // the camera model sees the flipped image, so the LiDAR edges must project onto
    // the mirrored rows of the raw image
    let spec = RasterSpec::from_cols(RASTER_COLS).unwrap();
    let camera = OmniCamera::new(intrinsics(), InverseModelKind::Spline).unwrap();
    let last = (SIZE - 1) as f64;
    let points: Vec<Vec3> = edge_cells()
        .iter()
        .map(|&(r, c)| {
            let (theta, phi) = spec.cell_center(r, c);
            let oriented = camera.project(&SphericalDir { theta, phi }.to_unit_vector());
            let raw = Vec2::new(last - oriented.x, oriented.y);
            camera.unproject(&raw).unwrap().to_unit_vector() * 3.0
        })
        .collect();
    let points_path = dir.path().join("lidar_mirrored.txt");
    fs::write(&points_path, points_text(&points)).unwrap();
    input.lidar = LidarSource::EdgePoints { path: points_path };
    let out = dir.path().join("out");

    let report = run_cocalibration(&input, &cfg, &out).unwrap();

    assert_eq!(report.stages.len(), 2);
    for stage in &report.stages {
        let err = stage.projection_error.mean.unwrap();
        assert!(err < 2.0, "bandwidth {}: projection error {err}", stage.bandwidth);
        assert_eq!(stage.projection_error.matched, points.len());
    }

    // fisheye edges are written in the raw frame: the ring sits on the mirrored side
    let fisheye = fs::read_to_string(out.join("camera_fisheye_edges.txt")).unwrap();
    let raw_rows: Vec<f64> = fisheye
        .lines()
        .map(|l| l.split('\t').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(raw_rows.len(), edge_cells().len());
    let mean_raw: f64 = raw_rows.iter().sum::<f64>() / raw_rows.len() as f64;
    let mean_projected: f64 = points
        .iter()
        .map(|p| camera.project(p).x)
        .sum::<f64>()
        / points.len() as f64;
    assert!((mean_raw - mean_projected).abs() < 1.0, "{mean_raw} vs {mean_projected}");
}

#[test]
fn lidar_cloud_with_edge_mask_calibrates() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = write_inputs(dir.path());
    let spec = RasterSpec::from_cols(RASTER_COLS).unwrap();

    // one point per LiDAR raster cell, so every masked cell recovers its direction
    let mut cloud = Vec::new();
    for r in 0..spec.rows {
        for c in 0..spec.cols {
            let (theta, phi) = spec.cell_center(r, c);
            cloud.push(SphericalDir { theta, phi }.to_unit_vector() * 2.5);
        }
    }
    let cloud_path = dir.path().join("cloud.txt");
    fs::write(&cloud_path, points_text(&cloud)).unwrap();
    let mask_path = dir.path().join("lidar_edges.png");
    edge_mask(&spec).save(&mask_path).unwrap();
    input.lidar = LidarSource::Cloud {
        path: cloud_path,
        edge_mask: Some(mask_path),
    };
    let out = dir.path().join("out");

    let report = run_cocalibration(&input, &config(), &out).unwrap();

    let lidar = report.diagnostics.lidar.expect("cloud source reports LiDAR diagnostics");
    assert_eq!(lidar.edge_pixels, edge_cells().len());
    assert_eq!(lidar.invalid_lookups, 0);
    assert_eq!(lidar.raster.invalid_searches, 0);
    assert_eq!(report.diagnostics.lidar_edge_points, edge_cells().len());
    for stage in &report.stages {
        assert!(stage.final_cost <= stage.initial_cost + 1e-12);
        assert!(stage.projection_error.mean.unwrap() < 2.0);
    }
    for name in ["lidar_flat.bmp", "lidar_edge_pixels.txt", "lidar_edge_points.txt"] {
        assert!(out.join(name).is_file(), "missing {name}");
    }
    let written = fs::read_to_string(out.join("lidar_edge_pixels.txt")).unwrap();
    assert_eq!(written.lines().count(), edge_cells().len());
}
