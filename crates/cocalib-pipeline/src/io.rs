//! File input and output at pipeline completion points.
//!
//! Every writer creates, fills and closes its own file; nothing keeps a handle open
//! between calls.

use anyhow::{bail, ensure, Context, Result};
use cocalib_core::{DensityGrid, EdgePixelSet, Real, Vec2, Vec3};
use cocalib_optim::{CalibParams, CostSlice};
use image::{GrayImage, RgbImage};
use log::debug;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Integer bandwidth tag used in output file names.
pub fn bandwidth_tag(bandwidth: Real) -> i64 {
    bandwidth as i64
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn finish(mut w: BufWriter<File>, path: &Path) -> Result<()> {
    w.flush()
        .with_context(|| format!("writing {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Load an RGB image in its stored orientation.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading image {}", path.display()))?
        .to_rgb8())
}

/// Load a single-channel edge mask; colour masks are converted to luma.
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    Ok(image::open(path)
        .with_context(|| format!("reading edge mask {}", path.display()))?
        .to_luma8())
}

pub fn save_image(path: &Path, image: &RgbImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    image
        .save(path)
        .with_context(|| format!("saving image {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Whitespace separated `x y z [intensity]` rows.
///
/// Blank lines and `#` comments are skipped. Intensities are returned only when
/// every row carries one.
pub fn read_points_txt(path: &Path) -> Result<(Vec<Vec3>, Option<Vec<f32>>)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading points {}", path.display()))?;
    let mut points = Vec::new();
    let mut intensities = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = line
            .split_whitespace()
            .map(str::parse::<Real>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: bad number", path.display(), lineno + 1))?;
        if fields.len() < 3 {
            bail!(
                "{}:{}: expected at least 3 columns, got {}",
                path.display(),
                lineno + 1,
                fields.len()
            );
        }
        points.push(Vec3::new(fields[0], fields[1], fields[2]));
        if let Some(i) = fields.get(3) {
            intensities.push(*i as f32);
        }
    }
    ensure!(!points.is_empty(), "{} holds no points", path.display());
    let intensities = (intensities.len() == points.len()).then_some(intensities);
    Ok((points, intensities))
}

pub fn write_points(path: &Path, points: &[Vec3]) -> Result<()> {
    let mut w = create(path)?;
    for p in points {
        writeln!(w, "{}\t{}\t{}", p.x, p.y, p.z)?;
    }
    finish(w, path)
}

/// `row\tcol` per edge pixel.
pub fn write_edge_pixels(path: &Path, edges: &EdgePixelSet) -> Result<()> {
    let mut w = create(path)?;
    for (r, c) in edges.pixels() {
        writeln!(w, "{r}\t{c}")?;
    }
    finish(w, path)
}

/// `u\tv` per fisheye edge pixel.
pub fn write_fisheye_edges(path: &Path, pixels: &[Vec2]) -> Result<()> {
    let mut w = create(path)?;
    for p in pixels {
        writeln!(w, "{}\t{}", p.x, p.y)?;
    }
    finish(w, path)
}

/// `x\ty\tdensity` per grid cell in storage order.
pub fn write_density(path: &Path, grid: &DensityGrid) -> Result<()> {
    let mut w = create(path)?;
    for (x, y, d) in grid.samples() {
        writeln!(w, "{x}\t{y}\t{d}")?;
    }
    finish(w, path)
}

/// Result of one calibration stage as plain text.
#[derive(Debug, Clone, Copy)]
pub struct ResultRecord<'a> {
    pub bandwidth: Real,
    pub initial_cost: Real,
    pub final_cost: Real,
    pub projection_error: Option<Real>,
    pub params: &'a CalibParams,
}

pub fn write_result_record(path: &Path, record: &ResultRecord<'_>) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "bandwidth\t{}", record.bandwidth)?;
    writeln!(w, "initial_cost\t{:.10e}", record.initial_cost)?;
    writeln!(w, "final_cost\t{:.10e}", record.final_cost)?;
    match record.projection_error {
        Some(e) => writeln!(w, "projection_error\t{e}")?,
        None => writeln!(w, "projection_error\tnan")?,
    }
    for (name, v) in CalibParams::NAMES.iter().zip(record.params.to_vec()) {
        writeln!(w, "{name}\t{v}")?;
    }
    finish(w, path)
}

/// File name of a sensitivity slice, e.g. `rx_ry_bw_8_result.txt`.
pub fn cost_slice_file_name(slice: &CostSlice, bandwidth: Real) -> String {
    format!("{}_bw_{}_result.txt", slice.label(), bandwidth_tag(bandwidth))
}

/// First line: initial and optimum value of every swept parameter.
/// Then one `values...\tcost` line per sample.
pub fn write_cost_slice(path: &Path, slice: &CostSlice) -> Result<()> {
    let mut w = create(path)?;
    let header: Vec<String> = slice
        .initial
        .iter()
        .zip(&slice.optimum)
        .flat_map(|(i, o)| [i.to_string(), o.to_string()])
        .collect();
    writeln!(w, "{}", header.join("\t"))?;
    for s in &slice.samples {
        for v in &s.values {
            write!(w, "{v}\t")?;
        }
        writeln!(w, "{}", s.cost)?;
    }
    finish(w, path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut w = create(path)?;
    serde_json::to_writer_pretty(&mut w, value)
        .with_context(|| format!("serializing {}", path.display()))?;
    writeln!(w)?;
    finish(w, path)
}

/// Output location helper rooted at the run directory.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("creating output directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
