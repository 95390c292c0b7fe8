//! Edge pixels on the raster and their source-position lookup.

use crate::{CoreError, CoreResult, RasterSpec, Real, TagMap, Vec2, Vec3, VecN};
use image::GrayImage;
use log::{info, warn};

/// Sorted, deduplicated `(row, col)` raster coordinates marked as edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgePixelSet {
    pixels: Vec<(usize, usize)>,
}

impl EdgePixelSet {
    pub const DEFAULT_THRESHOLD: u8 = 127;

    pub fn from_pixels<I: IntoIterator<Item = (usize, usize)>>(pixels: I) -> Self {
        let mut pixels: Vec<(usize, usize)> = pixels.into_iter().collect();
        pixels.sort_unstable();
        pixels.dedup();
        Self { pixels }
    }

    /// Pixels whose mask value exceeds `threshold`.
    pub fn from_mask(mask: &GrayImage, threshold: u8) -> Self {
        Self::from_pixels(
            mask.enumerate_pixels()
                .filter(|(_, _, p)| p.0[0] > threshold)
                .map(|(x, y, _)| (y as usize, x as usize)),
        )
    }

    /// Like [`EdgePixelSet::from_mask`], requiring the mask to cover `spec` exactly.
    pub fn from_raster_mask(mask: &GrayImage, spec: &RasterSpec, threshold: u8) -> CoreResult<Self> {
        let (cols, rows) = mask.dimensions();
        if rows as usize != spec.rows || cols as usize != spec.cols {
            return Err(CoreError::ImageSizeMismatch {
                expected_rows: spec.rows,
                expected_cols: spec.cols,
                actual_rows: rows as usize,
                actual_cols: cols as usize,
            });
        }
        Ok(Self::from_mask(mask, threshold))
    }

    pub fn pixels(&self) -> &[(usize, usize)] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn check_bounds(&self, spec: &RasterSpec) -> CoreResult<()> {
        match self
            .pixels
            .iter()
            .find(|(r, c)| *r >= spec.rows || *c >= spec.cols)
        {
            Some(&(row, col)) => Err(CoreError::EdgeOutOfBounds {
                row,
                col,
                rows: spec.rows,
                cols: spec.cols,
            }),
            None => Ok(()),
        }
    }

    /// Coordinates as real-valued samples.
    pub fn as_samples(&self) -> Vec<Vec2> {
        self.pixels
            .iter()
            .map(|&(r, c)| Vec2::new(r as Real, c as Real))
            .collect()
    }
}

/// Averaged source positions of edge pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeLookup<const D: usize> {
    pub positions: Vec<VecN<D>>,
    pub invalid_lookups: usize,
}

/// Fisheye pixel positions of camera edges.
pub type EdgeFisheyePixels = Vec<Vec2>;
/// LiDAR-frame positions of LiDAR edges.
pub type EdgePoints3D = Vec<Vec3>;

/// For every edge pixel, average the source positions of all points tagged to its
/// cell. Cells without tags are skipped and counted in `invalid_lookups`.
pub fn lookup_positions<const D: usize>(
    edges: &EdgePixelSet,
    tags: &TagMap,
    positions: &[VecN<D>],
) -> CoreResult<EdgeLookup<D>> {
    if edges.is_empty() {
        return Err(CoreError::EmptyEdgeSet);
    }
    edges.check_bounds(&RasterSpec {
        rows: tags.rows(),
        cols: tags.cols(),
        rad_per_pix: 0.0,
    })?;

    let mut out = Vec::with_capacity(edges.len());
    let mut invalid_lookups = 0;
    for &(row, col) in edges.pixels() {
        let mut sum = VecN::<D>::zeros();
        let mut n = 0usize;
        for &idx in tags.tags(row, col) {
            if let Some(p) = positions.get(idx as usize) {
                sum += p;
                n += 1;
            }
        }
        if n == 0 {
            invalid_lookups += 1;
            continue;
        }
        out.push(sum / n as Real);
    }

    if invalid_lookups > 0 {
        warn!(
            "lookup_positions: {} of {} edge pixels had no tagged source points",
            invalid_lookups,
            edges.len()
        );
    }
    info!("lookup_positions: {} edge positions", out.len());
    Ok(EdgeLookup {
        positions: out,
        invalid_lookups,
    })
}
