//! Spherical-to-planar resampling with per-cell provenance.
//!
//! Every raster cell `(row, col)` covers the angular centre
//! `θ = (row + ½)·Δ`, `φ = (col + ½)·Δ` with `Δ = 2π / cols`. The cell colour is the
//! mean of the source points found within `Δ / 2` of that centre; when the search
//! misses, the radius grows from 1.05x to 2x in 0.05x steps before the cell is
//! given up as black.

use crate::{CoreError, CoreResult, Real, SphericalCloud, SphericalPoint};
use image::{Rgb, RgbImage};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const FALLBACK_STEPS: usize = 20;
const FALLBACK_STEP: Real = 0.05;

/// Shape and angular resolution of an equirectangular raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterSpec {
    pub rows: usize,
    pub cols: usize,
    pub rad_per_pix: Real,
}

impl RasterSpec {
    pub const DEFAULT_COLS: usize = 4000;

    /// `cols` cells across `2π` of azimuth; `rows = ceil(π / Δ)` cells of polar angle.
    pub fn from_cols(cols: usize) -> CoreResult<Self> {
        if cols < 2 {
            return Err(CoreError::InvalidRasterCols(cols));
        }
        Ok(Self {
            rows: cols.div_ceil(2),
            cols,
            rad_per_pix: 2.0 * PI / cols as Real,
        })
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Angular centre `(θ, φ)` of a cell.
    pub fn cell_center(&self, row: usize, col: usize) -> (Real, Real) {
        (
            (row as Real + 0.5) * self.rad_per_pix,
            (col as Real + 0.5) * self.rad_per_pix,
        )
    }

    pub fn search_radius(&self) -> Real {
        self.rad_per_pix / 2.0
    }
}

impl Default for RasterSpec {
    fn default() -> Self {
        Self {
            rows: Self::DEFAULT_COLS / 2,
            cols: Self::DEFAULT_COLS,
            rad_per_pix: 2.0 * PI / Self::DEFAULT_COLS as Real,
        }
    }
}

/// Radius query over `(θ, φ)`; implementations return source indices.
pub trait NeighbourSearch: Sync {
    fn within(&self, theta: Real, phi: Real, radius: Real) -> Vec<usize>;
}

/// k-d tree over the `(θ, φ)` coordinates of a cloud.
pub struct KdNeighbourSearch {
    tree: ImmutableKdTree<f64, u32, 2, 32>,
}

impl KdNeighbourSearch {
    pub fn new(points: &[SphericalPoint]) -> CoreResult<Self> {
        if points.is_empty() {
            return Err(CoreError::EmptyCloud);
        }
        let coords: Vec<[f64; 2]> = points.iter().map(|p| [p.theta, p.phi]).collect();
        Ok(Self {
            tree: ImmutableKdTree::new_from_slice(&coords),
        })
    }
}

impl NeighbourSearch for KdNeighbourSearch {
    fn within(&self, theta: Real, phi: Real, radius: Real) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .tree
            .within_unsorted::<SquaredEuclidean>(&[theta, phi], radius * radius)
            .into_iter()
            .map(|nn| nn.item as usize)
            .collect();
        found.sort_unstable();
        found
    }
}

/// How a cell obtained its tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    /// Neighbours found at the base radius.
    Direct,
    /// Neighbours found only after widening the search.
    Expanded,
    /// No valid neighbour up to twice the base radius; the cell is black.
    Unresolved,
}

/// Compressed per-cell lists of contributing source indices.
///
/// Every stored index is valid for the cloud the map was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct TagMap {
    rows: usize,
    cols: usize,
    offsets: Vec<usize>,
    indices: Vec<u32>,
    states: Vec<CellState>,
}

impl TagMap {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn tags(&self, row: usize, col: usize) -> &[u32] {
        let cell = row * self.cols + col;
        &self.indices[self.offsets[cell]..self.offsets[cell + 1]]
    }

    pub fn state(&self, row: usize, col: usize) -> CellState {
        self.states[row * self.cols + col]
    }

    pub fn max_index(&self) -> Option<u32> {
        self.indices.iter().copied().max()
    }
}

/// Diagnostics of one rasterization; never fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterStats {
    pub invalid_searches: usize,
    pub invalid_indices: usize,
    pub expanded_cells: usize,
}

#[derive(Debug, Clone)]
pub struct EquirectangularRaster {
    pub spec: RasterSpec,
    pub image: RgbImage,
    pub tags: TagMap,
    pub stats: RasterStats,
}

/// What a rasterization is for; selects the output image name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RasterPurpose {
    /// Input to the external edge detector during calibration.
    Flat,
    /// Evaluation image produced after calibrating at `bandwidth`.
    Fusion { bandwidth: Real },
}

impl RasterPurpose {
    pub fn file_name(&self, sensor: &str) -> String {
        match self {
            RasterPurpose::Flat => format!("{sensor}_flat.bmp"),
            RasterPurpose::Fusion { bandwidth } => {
                format!("{sensor}_fusion_bw_{}.bmp", *bandwidth as i64)
            }
        }
    }
}

struct CellFill {
    color: [u8; 3],
    tags: Vec<u32>,
    state: CellState,
    invalid_indices: usize,
}

fn fill_cell<S: NeighbourSearch>(
    points: &[SphericalPoint],
    spec: &RasterSpec,
    search: &S,
    row: usize,
    col: usize,
) -> CellFill {
    let (theta, phi) = spec.cell_center(row, col);
    let base = spec.search_radius();

    let mut state = CellState::Direct;
    let mut found = search.within(theta, phi, base);
    if found.is_empty() {
        state = CellState::Expanded;
        for step in 1..=FALLBACK_STEPS {
            let scale = 1.0 + FALLBACK_STEP * step as Real;
            found = search.within(theta, phi, base * scale);
            if !found.is_empty() {
                break;
            }
        }
    }

    let mut sum = [0u64; 3];
    let mut tags = Vec::with_capacity(found.len());
    let mut invalid_indices = 0;
    for idx in found {
        match points.get(idx) {
            Some(p) => {
                for (acc, ch) in sum.iter_mut().zip(p.color.iter()) {
                    *acc += u64::from(*ch);
                }
                tags.push(idx as u32);
            }
            None => invalid_indices += 1,
        }
    }

    if tags.is_empty() {
        return CellFill {
            color: [0; 3],
            tags,
            state: CellState::Unresolved,
            invalid_indices,
        };
    }
    let n = tags.len() as u64;
    CellFill {
        color: [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8],
        tags,
        state,
        invalid_indices,
    }
}

/// Resample `cloud` into an equirectangular raster using `search` for neighbours.
///
/// Rows are filled in parallel; each worker owns its output row.
pub fn sphere_to_plane<const D: usize, S: NeighbourSearch>(
    cloud: &SphericalCloud<D>,
    spec: &RasterSpec,
    search: &S,
) -> CoreResult<EquirectangularRaster> {
    if cloud.is_empty() {
        return Err(CoreError::EmptyCloud);
    }

    let rows: Vec<Vec<CellFill>> = (0..spec.rows)
        .into_par_iter()
        .map(|row| {
            (0..spec.cols)
                .map(|col| fill_cell(&cloud.points, spec, search, row, col))
                .collect()
        })
        .collect();

    let mut image = RgbImage::new(spec.cols as u32, spec.rows as u32);
    let mut offsets = Vec::with_capacity(spec.len() + 1);
    let mut indices = Vec::new();
    let mut states = Vec::with_capacity(spec.len());
    let mut stats = RasterStats::default();
    offsets.push(0);

    for (row, cells) in rows.into_iter().enumerate() {
        for (col, cell) in cells.into_iter().enumerate() {
            image.put_pixel(col as u32, row as u32, Rgb(cell.color));
            stats.invalid_indices += cell.invalid_indices;
            match cell.state {
                CellState::Unresolved => stats.invalid_searches += 1,
                CellState::Expanded => stats.expanded_cells += 1,
                CellState::Direct => {}
            }
            indices.extend(cell.tags);
            offsets.push(indices.len());
            states.push(cell.state);
        }
    }

    if stats.invalid_indices > 0 {
        warn!(
            "sphere_to_plane: {} neighbour indices outside the {}-point cloud were ignored",
            stats.invalid_indices,
            cloud.len()
        );
    }
    info!(
        "sphere_to_plane: {}x{} raster, invalid searches {}, invalid indices {}, expanded {}",
        spec.rows, spec.cols, stats.invalid_searches, stats.invalid_indices, stats.expanded_cells
    );

    Ok(EquirectangularRaster {
        spec: *spec,
        image,
        tags: TagMap {
            rows: spec.rows,
            cols: spec.cols,
            offsets,
            indices,
            states,
        },
        stats,
    })
}

/// Build a k-d index over `cloud` and rasterize it.
pub fn rasterize<const D: usize>(
    cloud: &SphericalCloud<D>,
    spec: &RasterSpec,
) -> CoreResult<EquirectangularRaster> {
    let search = KdNeighbourSearch::new(&cloud.points)?;
    sphere_to_plane(cloud, spec, &search)
}
