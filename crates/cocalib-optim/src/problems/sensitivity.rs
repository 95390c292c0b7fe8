//! Cost-surface slices around a calibration result.
//!
//! The sweep cost is the plain density response `Σ (sqrt(1/N) · density)²` over
//! projections inside the effective-radius annulus: no Huber loss, no reference
//! offset. A good optimum sits at the top of every slice.

use crate::params::CalibParams;
use crate::problems::cocalibration::CocalibDataset;
use anyhow::{ensure, Result};
use cocalib_core::{project_omni, BicubicInterpolator, Real};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default half-width of a sweep in steps (201 samples).
pub const DEFAULT_HALF_STEPS: usize = 100;

/// One swept parameter in the external layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSpec {
    pub param: usize,
    pub half_steps: usize,
    pub step: Real,
}

impl SweepSpec {
    /// Default step: 2e-4 rad for angles, 1e-3 for translations, 1e-2 for intrinsics.
    pub fn for_param(param: usize) -> Self {
        let step = match param {
            0..=2 => 2e-4,
            3..=5 => 1e-3,
            _ => 1e-2,
        };
        Self {
            param,
            half_steps: DEFAULT_HALF_STEPS,
            step,
        }
    }

    pub fn offsets(&self) -> impl Iterator<Item = Real> + '_ {
        let n = self.half_steps as i64;
        (-n..=n).map(move |i| i as Real * self.step)
    }
}

/// One slice per extrinsic parameter, the default diagnostic set.
pub fn default_sweeps() -> Vec<Vec<SweepSpec>> {
    (0..6).map(|p| vec![SweepSpec::for_param(p)]).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSample {
    /// Absolute values of the swept parameters.
    pub values: Vec<Real>,
    pub cost: Real,
}

/// Cost surface over one or more swept parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSlice {
    pub params: Vec<usize>,
    pub names: Vec<String>,
    /// Swept parameter values before optimization.
    pub initial: Vec<Real>,
    /// Swept parameter values at the optimum.
    pub optimum: Vec<Real>,
    pub samples: Vec<CostSample>,
}

impl CostSlice {
    /// Sample with the largest density response.
    pub fn peak(&self) -> Option<&CostSample> {
        self.samples
            .iter()
            .fold(None, |best: Option<&CostSample>, s| match best {
                Some(b) if b.cost >= s.cost => Some(b),
                _ => Some(s),
            })
    }

    pub fn label(&self) -> String {
        self.names.join("_")
    }
}

/// Unweighted, unrobustified density response of all in-annulus projections.
pub fn density_response(dataset: &CocalibDataset, params: &CalibParams) -> Real {
    let w2 = 1.0 / dataset.num_points() as Real;
    let k = params.intrinsics.to_array();
    let principal = params.intrinsics.principal_point();
    let interp = BicubicInterpolator::new(&dataset.grid);
    dataset
        .lidar_edges
        .iter()
        .map(|p| project_omni(&k, &params.extrinsics.transform_point(p)))
        .filter(|px| dataset.radius.contains(px, &principal))
        .map(|px| {
            let val: Real = interp.evaluate(px.x * dataset.scale, px.y * dataset.scale);
            w2 * val * val
        })
        .sum()
}

/// Sweep the cartesian grid of `specs` around `optimum`.
pub fn sweep_cost(
    dataset: &CocalibDataset,
    initial: &CalibParams,
    optimum: &CalibParams,
    specs: &[SweepSpec],
) -> Result<CostSlice> {
    ensure!(!specs.is_empty(), "sweep needs at least one parameter");
    for s in specs {
        ensure!(
            s.param < CalibParams::DIM,
            "swept parameter index {} out of range",
            s.param
        );
        ensure!(s.step > 0.0, "sweep step must be positive");
    }

    let center = optimum.to_vec();
    let init = initial.to_vec();

    let mut grid: Vec<Vec<Real>> = vec![Vec::new()];
    for s in specs {
        let base = center[s.param];
        grid = grid
            .into_iter()
            .flat_map(|prefix| {
                s.offsets().map(move |off| {
                    let mut v = prefix.clone();
                    v.push(base + off);
                    v
                })
            })
            .collect();
    }
    debug!("sweep_cost: {} samples over {} parameters", grid.len(), specs.len());

    let samples = grid
        .into_par_iter()
        .map(|values| {
            let mut p = center.clone();
            for (s, v) in specs.iter().zip(&values) {
                p[s.param] = *v;
            }
            let params = CalibParams::from_slice(&p)?;
            Ok(CostSample {
                cost: density_response(dataset, &params),
                values,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let slice = CostSlice {
        params: specs.iter().map(|s| s.param).collect(),
        names: specs
            .iter()
            .map(|s| CalibParams::NAMES[s.param].to_string())
            .collect(),
        initial: specs.iter().map(|s| init[s.param]).collect(),
        optimum: specs.iter().map(|s| center[s.param]).collect(),
        samples,
    };
    if let Some(peak) = slice.peak() {
        info!(
            "sweep_cost[{}]: peak response {:.6e} at {:?}",
            slice.label(),
            peak.cost,
            peak.values
        );
    }
    Ok(slice)
}
