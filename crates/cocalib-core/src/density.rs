//! Epanechnikov kernel density estimate over edge pixels, sampled on a regular grid.
//!
//! The grid covers `floor(scale·rows) x floor(scale·cols)` query points. Query row
//! coordinates are `linspace(0, rows - 1, n_rows)` taken in reverse order and
//! column coordinates are taken in forward order; values are flattened row-major.
//! With a vertically flipped source image, the reversal puts grid row `i` at raw
//! image row `i / scale`, which is where the optimizer reads it.

use crate::{linspace, CoreError, CoreResult, Real, Vec2};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Kernel support radius in pixels.
    pub bandwidth: Real,
    /// Grid supersampling relative to the image size.
    pub scale: Real,
    /// Approximation tolerance; `0` evaluates every sample exactly.
    pub rel_error: Real,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            bandwidth: 16.0,
            scale: 1.0,
            rel_error: 0.05,
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.bandwidth.is_finite() && self.bandwidth > 0.0) {
            return Err(CoreError::InvalidBandwidth(self.bandwidth));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(CoreError::InvalidScale(self.scale));
        }
        if !(self.rel_error.is_finite() && (0.0..1.0).contains(&self.rel_error)) {
            return Err(CoreError::InvalidRelError(self.rel_error));
        }
        Ok(())
    }
}

/// Dense density samples; immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    n_rows: usize,
    n_cols: usize,
    values: Vec<Real>,
    query_rows: Vec<Real>,
    query_cols: Vec<Real>,
}

impl DensityGrid {
    /// Wrap precomputed values; `query_rows`/`query_cols` give each index's image coordinate.
    pub fn from_parts(values: Vec<Real>, query_rows: Vec<Real>, query_cols: Vec<Real>) -> CoreResult<Self> {
        let expected = query_rows.len() * query_cols.len();
        if values.len() != expected || expected == 0 {
            return Err(CoreError::LengthMismatch {
                what: "density values",
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            n_rows: query_rows.len(),
            n_cols: query_cols.len(),
            values,
            query_rows,
            query_cols,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn values(&self) -> &[Real] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> Real {
        self.values[row * self.n_cols + col]
    }

    /// Image coordinates `(row, col)` queried for grid cell `(row, col)`.
    pub fn query_coords(&self, row: usize, col: usize) -> Vec2 {
        Vec2::new(self.query_rows[row], self.query_cols[col])
    }

    pub fn max(&self) -> Real {
        self.values.iter().copied().fold(Real::NEG_INFINITY, Real::max)
    }

    pub fn sum(&self) -> Real {
        self.values.iter().sum()
    }

    /// Grid index of the first maximum in row-major order.
    pub fn argmax(&self) -> (usize, usize) {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate() {
            if *v > self.values[best] {
                best = i;
            }
        }
        (best / self.n_cols, best % self.n_cols)
    }

    /// `(query_row, query_col, density)` in flattened order.
    pub fn samples(&self) -> impl Iterator<Item = (Real, Real, Real)> + '_ {
        self.values.iter().enumerate().map(move |(i, v)| {
            let (r, c) = (i / self.n_cols, i % self.n_cols);
            (self.query_rows[r], self.query_cols[c], *v)
        })
    }
}

/// Weighted kernel centres. With `cell > 0` the samples are binned and each bin
/// contributes its count at its centroid.
fn kernel_centres(samples: &[Vec2], cell: Real) -> (Vec<[Real; 2]>, Vec<Real>) {
    if cell <= 0.0 {
        return (samples.iter().map(|p| [p.x, p.y]).collect(), vec![1.0; samples.len()]);
    }
    let mut bins: BTreeMap<(i64, i64), (Real, Real, Real)> = BTreeMap::new();
    for p in samples {
        let key = ((p.x / cell).floor() as i64, (p.y / cell).floor() as i64);
        let entry = bins.entry(key).or_insert((0.0, 0.0, 0.0));
        entry.0 += p.x;
        entry.1 += p.y;
        entry.2 += 1.0;
    }
    bins.values()
        .map(|&(sx, sy, n)| ([sx / n, sy / n], n))
        .unzip()
}

/// Estimate the edge density over an `image_rows x image_cols` image.
///
/// Fails fast on an empty sample set.
pub fn estimate_density(
    samples: &[Vec2],
    image_rows: usize,
    image_cols: usize,
    cfg: &DensityConfig,
) -> CoreResult<DensityGrid> {
    if samples.is_empty() {
        return Err(CoreError::EmptyEdgeSet);
    }
    cfg.validate()?;
    let start = Instant::now();

    let n_rows = (cfg.scale * image_rows as Real) as usize;
    let n_cols = (cfg.scale * image_cols as Real) as usize;
    if n_rows == 0 || n_cols == 0 {
        return Err(CoreError::InvalidScale(cfg.scale));
    }
    let mut query_rows = linspace(0.0, image_rows.saturating_sub(1) as Real, n_rows);
    query_rows.reverse();
    let query_cols = linspace(0.0, image_cols.saturating_sub(1) as Real, n_cols);

    let h = cfg.bandwidth;
    let h2 = h * h;
    let (centres, weights) = kernel_centres(samples, cfg.rel_error * h);
    debug!(
        "estimate_density: {} samples in {} kernel centres",
        samples.len(),
        centres.len()
    );
    let tree: ImmutableKdTree<f64, u32, 2, 32> = ImmutableKdTree::new_from_slice(&centres);
    let norm = 1.0 / (samples.len() as Real * PI * h2 / 2.0);

    let values: Vec<Real> = query_rows
        .par_iter()
        .flat_map_iter(|&qr| {
            let tree = &tree;
            let weights = &weights;
            query_cols.iter().map(move |&qc| {
                let mut acc = 0.0;
                for nn in tree.within_unsorted::<SquaredEuclidean>(&[qr, qc], h2) {
                    let k = 1.0 - nn.distance / h2;
                    if k > 0.0 {
                        acc += weights[nn.item as usize] * k;
                    }
                }
                acc * norm
            })
        })
        .collect();

    let grid = DensityGrid::from_parts(values, query_rows, query_cols)?;
    info!(
        "estimate_density: {}x{} grid, sum = {:.6}, max = {:.6e}, bandwidth = {}, {:.3}s",
        n_rows,
        n_cols,
        grid.sum(),
        grid.max(),
        h,
        start.elapsed().as_secs_f64()
    );
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn exact(bandwidth: Real) -> DensityConfig {
        DensityConfig {
            bandwidth,
            scale: 1.0,
            rel_error: 0.0,
        }
    }

    #[test]
    fn single_pixel_peaks_at_its_location() {
        let grid = estimate_density(&[Vec2::new(4.0, 4.0)], 8, 8, &exact(1.0)).unwrap();
        assert_eq!((grid.n_rows(), grid.n_cols()), (8, 8));
        let (r, c) = grid.argmax();
        assert_eq!(grid.query_coords(r, c), Vec2::new(4.0, 4.0));
        // rows are stored in reverse query order
        assert_eq!((r, c), (3, 4));
        assert!((grid.max() - 2.0 / PI).abs() < 1e-12);
        assert_eq!(grid.values().iter().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn cluster_localizes_peak_within_one_cell() {
        let mut samples = Vec::new();
        for dr in -2..=2 {
            for dc in -2..=2 {
                samples.push(Vec2::new(20.0 + dr as Real * 0.5, 31.0 + dc as Real * 0.5));
            }
        }
        samples.push(Vec2::new(3.0, 3.0));
        samples.push(Vec2::new(45.0, 5.0));
        let cfg = DensityConfig {
            bandwidth: 4.0,
            scale: 1.0,
            rel_error: 0.05,
        };
        let grid = estimate_density(&samples, 48, 64, &cfg).unwrap();
        assert!(grid.values().iter().all(|v| *v >= 0.0));
        let (r, c) = grid.argmax();
        let at = grid.query_coords(r, c);
        assert!((at - Vec2::new(20.0, 31.0)).norm() <= 1.5, "peak at {at:?}");
    }

    #[test]
    fn approximation_stays_close_to_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<Vec2> = (0..200)
            .map(|_| Vec2::new(rng.random_range(8.0..22.0), rng.random_range(10.0..20.0)))
            .collect();
        let fast = DensityConfig {
            bandwidth: 6.0,
            scale: 1.0,
            rel_error: 0.05,
        };
        let a = estimate_density(&samples, 32, 32, &fast).unwrap();
        let b = estimate_density(&samples, 32, 32, &exact(6.0)).unwrap();
        let peak = b.max();
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() <= 0.05 * peak, "{x} vs {y}");
        }
    }

    #[test]
    fn supersampled_grid_spans_the_image() {
        let cfg = DensityConfig {
            bandwidth: 2.0,
            scale: 2.0,
            rel_error: 0.0,
        };
        let grid = estimate_density(&[Vec2::new(1.0, 1.0)], 4, 5, &cfg).unwrap();
        assert_eq!((grid.n_rows(), grid.n_cols()), (8, 10));
        assert_eq!(grid.query_coords(0, 0), Vec2::new(3.0, 0.0));
        assert_eq!(grid.query_coords(7, 9), Vec2::new(0.0, 4.0));
        assert_eq!(grid.samples().count(), 80);
    }

    #[test]
    fn preconditions_fail_fast() {
        assert_eq!(
            estimate_density(&[], 8, 8, &exact(1.0)),
            Err(CoreError::EmptyEdgeSet)
        );
        let one = [Vec2::new(1.0, 1.0)];
        assert_eq!(
            estimate_density(&one, 8, 8, &exact(0.0)),
            Err(CoreError::InvalidBandwidth(0.0))
        );
        let bad_scale = DensityConfig {
            scale: -1.0,
            ..exact(1.0)
        };
        assert_eq!(
            estimate_density(&one, 8, 8, &bad_scale),
            Err(CoreError::InvalidScale(-1.0))
        );
    }
}
