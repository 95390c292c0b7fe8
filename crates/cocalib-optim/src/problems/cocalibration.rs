//! Joint LiDAR-camera extrinsics and intrinsics refinement.
//!
//! Every LiDAR edge point contributes one residual block over
//! `[rotation, translation, intrinsics]`, wrapped in a Huber loss. The residual
//! pulls the projected point towards the peak of the camera edge density.

use crate::factors::density::{DensityFactor, RESIDUAL_DIM};
use crate::params::rotation::{dvec_to_quat, quat_to_dvec};
use crate::params::{CalibParams, ParamBlock, ParamBounds};
use crate::solver::tiny::{problem_cost, solve, TinySolveOptions};
use anyhow::{anyhow, ensure, Context, Result};
use cocalib_core::{
    mean_edge_distance, project_points, DensityGrid, EdgeDistance, EffectiveRadius, Extrinsics,
    OmniIntrinsics, Real, Vec2, Vec3, DEFAULT_EDGE_MATCH_RANGE,
};
use log::{info, warn};
use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tiny_solver::loss_functions::{HuberLoss, Loss};
use tiny_solver::manifold::so3::QuaternionManifold;
use tiny_solver::problem::Problem;

/// Inputs shared by the optimizer and the sensitivity sweeps.
#[derive(Debug, Clone)]
pub struct CocalibDataset {
    /// LiDAR edge points in the LiDAR frame.
    pub lidar_edges: Vec<Vec3>,
    /// Camera edge pixels in the raw image frame, used for the projection error.
    pub camera_edges: Vec<Vec2>,
    /// Density of camera edges, indexed by `scale · (u, v)`.
    pub grid: Arc<DensityGrid>,
    pub scale: Real,
    pub radius: EffectiveRadius,
}

impl CocalibDataset {
    pub fn new(
        lidar_edges: Vec<Vec3>,
        camera_edges: Vec<Vec2>,
        grid: Arc<DensityGrid>,
        scale: Real,
        radius: EffectiveRadius,
    ) -> Result<Self> {
        ensure!(!lidar_edges.is_empty(), "LiDAR edge cloud is empty");
        ensure!(!camera_edges.is_empty(), "camera edge set is empty");
        ensure!(
            scale.is_finite() && scale > 0.0,
            "density scale must be positive (got {})",
            scale
        );
        Ok(Self {
            lidar_edges,
            camera_edges,
            grid,
            scale,
            radius,
        })
    }

    pub fn num_points(&self) -> usize {
        self.lidar_edges.len()
    }
}

/// Solve options specific to co-calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CocalibSolveOptions {
    /// Keep the intrinsics block constant.
    pub lock_intrinsics: bool,
    /// Box half-width for each quaternion component around its initial value.
    pub q_lim: Real,
    pub huber_scale: Real,
    /// Residual weights are `sqrt(target_residual_count / num_points)`.
    pub target_residual_count: Real,
    /// Pixel range for the edge-to-edge projection error.
    pub edge_match_range: Real,
}

impl Default for CocalibSolveOptions {
    fn default() -> Self {
        Self {
            lock_intrinsics: false,
            q_lim: 0.15,
            huber_scale: 0.05,
            target_residual_count: 50_000.0,
            edge_match_range: DEFAULT_EDGE_MATCH_RANGE,
        }
    }
}

/// Output of one co-calibration run.
#[derive(Debug, Clone)]
pub struct CocalibResult {
    pub params: CalibParams,
    pub initial_cost: f64,
    pub final_cost: f64,
    /// False when the solver gave up; `params` then holds the initial estimate.
    pub converged: bool,
    pub projection_error: EdgeDistance,
    /// Unclamped projections of the LiDAR edges at `params`.
    pub projections: Vec<Vec2>,
}

fn initial_blocks(init: &CalibParams) -> HashMap<String, DVector<f64>> {
    let t = init.extrinsics.translation;
    let mut map = HashMap::new();
    map.insert(
        ParamBlock::Rotation.name().to_string(),
        quat_to_dvec(&init.extrinsics.rotation),
    );
    map.insert(
        ParamBlock::Translation.name().to_string(),
        nalgebra::dvector![t.x, t.y, t.z],
    );
    map.insert(
        ParamBlock::Intrinsics.name().to_string(),
        DVector::from_row_slice(&init.intrinsics.to_array()),
    );
    map
}

fn block<'a>(map: &'a HashMap<String, DVector<f64>>, b: ParamBlock) -> Result<&'a DVector<f64>> {
    map.get(b.name())
        .ok_or_else(|| anyhow!("missing {} block in solution", b.name()))
}

/// Read calibration parameters back from solver blocks.
pub fn params_from_blocks(map: &HashMap<String, DVector<f64>>) -> Result<CalibParams> {
    let rotation = dvec_to_quat(block(map, ParamBlock::Rotation)?.as_view())?;
    let t = block(map, ParamBlock::Translation)?;
    ensure!(t.len() == 3, "translation block must have 3 entries");
    let intrinsics = OmniIntrinsics::from_slice(block(map, ParamBlock::Intrinsics)?.as_slice())?;
    Ok(CalibParams::new(
        Extrinsics {
            rotation,
            translation: Vector3::new(t[0], t[1], t[2]),
        },
        intrinsics,
    ))
}

/// Build a tiny-solver problem and initial parameter map.
pub fn build_cocalib_problem(
    dataset: &CocalibDataset,
    init: &CalibParams,
    bounds: &ParamBounds,
    opts: &CocalibSolveOptions,
) -> Result<(Problem, HashMap<String, DVector<f64>>)> {
    bounds.validate()?;
    init.intrinsics.validate()?;
    ensure!(opts.q_lim > 0.0, "quaternion box half-width must be positive");
    ensure!(opts.huber_scale > 0.0, "Huber scale must be positive");
    ensure!(
        opts.target_residual_count > 0.0,
        "target residual count must be positive"
    );

    let rot = ParamBlock::Rotation.name();
    let trans = ParamBlock::Translation.name();
    let intr = ParamBlock::Intrinsics.name();

    let mut problem = Problem::new();
    let initial = initial_blocks(init);

    let weight = (opts.target_residual_count / dataset.num_points() as Real).sqrt();
    let reference = dataset.grid.max();
    for p in &dataset.lidar_edges {
        let factor = DensityFactor {
            point: *p,
            weight,
            reference,
            scale: dataset.scale,
            grid: dataset.grid.clone(),
        };
        let loss: Option<Box<dyn Loss + Send>> = Some(Box::new(HuberLoss::new(opts.huber_scale)));
        problem.add_residual_block(RESIDUAL_DIM, &[rot, trans, intr], Box::new(factor), loss);
    }

    problem.set_variable_manifold(rot, Arc::new(QuaternionManifold));
    let q0 = block(&initial, ParamBlock::Rotation)?;
    for i in 0..ParamBlock::Rotation.dim() {
        problem.set_variable_bounds(rot, i, q0[i] - opts.q_lim, q0[i] + opts.q_lim);
    }
    for i in 0..ParamBlock::Translation.dim() {
        let (lo, hi) = bounds.translation(i);
        problem.set_variable_bounds(trans, i, lo, hi);
    }
    for i in 0..ParamBlock::Intrinsics.dim() {
        if opts.lock_intrinsics {
            problem.fix_variable(intr, i);
        } else {
            let (lo, hi) = bounds.intrinsic(i);
            problem.set_variable_bounds(intr, i, lo, hi);
        }
    }

    Ok((problem, initial))
}

/// Refine extrinsics (and optionally intrinsics) against the density field.
///
/// Solver failure is not an error: the initial estimate is returned with
/// `converged == false`.
pub fn optimize_cocalib(
    dataset: &CocalibDataset,
    init: &CalibParams,
    bounds: &ParamBounds,
    opts: &CocalibSolveOptions,
    solver: &TinySolveOptions,
) -> Result<CocalibResult> {
    let (problem, initial_map) = build_cocalib_problem(dataset, init, bounds, opts)?;
    let initial_cost = problem_cost(&problem, &initial_map);
    info!(
        "co-calibration: {} residual blocks, reference density {:.6e}, initial cost {:.6e}",
        dataset.num_points(),
        dataset.grid.max(),
        initial_cost
    );

    let (solution, converged) = match solve(&problem, initial_map.clone(), solver) {
        Ok(solution) => (solution, true),
        Err(err) => {
            warn!("co-calibration: {err}; keeping the initial estimate");
            (initial_map, false)
        }
    };
    let final_cost = problem_cost(&problem, &solution);
    let params = params_from_blocks(&solution)?;
    info!(
        "co-calibration: final cost {:.6e} (converged: {})",
        final_cost, converged
    );

    let projections = project_points(&params.extrinsics, &params.intrinsics, &dataset.lidar_edges);
    let projection_error =
        mean_edge_distance(&dataset.camera_edges, &projections, opts.edge_match_range)
            .context("projection error")?;
    match projection_error.mean {
        Some(mean) => info!(
            "co-calibration: projection error {:.3} px over {}/{} edges",
            mean, projection_error.matched, projection_error.total
        ),
        None => warn!(
            "co-calibration: no projected edge within {} px of a camera edge",
            opts.edge_match_range
        ),
    }

    Ok(CocalibResult {
        params,
        initial_cost,
        final_cost,
        converged,
        projection_error,
        projections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cocalib_core::{estimate_density, DensityConfig};

    fn small_dataset() -> CocalibDataset {
        let cfg = DensityConfig {
            bandwidth: 4.0,
            scale: 1.0,
            rel_error: 0.0,
        };
        let camera_edges = vec![Vec2::new(7.0, 9.0), Vec2::new(9.5, 6.0), Vec2::new(8.0, 8.5)];
        let grid = estimate_density(&camera_edges, 16, 16, &cfg).unwrap();
        CocalibDataset::new(
            vec![
                Vec3::new(0.2, 0.1, 1.0),
                Vec3::new(-0.1, 0.15, 1.2),
                Vec3::new(0.05, -0.2, 0.9),
            ],
            camera_edges,
            Arc::new(grid),
            1.0,
            EffectiveRadius {
                inner: 0.5,
                outer: 7.5,
            },
        )
        .unwrap()
    }

    fn small_params() -> CalibParams {
        CalibParams::new(
            Extrinsics::from_euler_translation([0.01, -0.02, 0.03, 0.01, -0.02, 0.0]),
            OmniIntrinsics {
                u0: 8.0,
                v0: 8.0,
                a0: 0.0,
                a1: 6.0,
                a2: 0.0,
                a3: 0.0,
                a4: 0.0,
                c: 1.0,
                d: 0.0,
                e: 0.0,
            },
        )
    }

    #[test]
    fn problem_jacobian_is_finite_over_all_blocks() {
        let dataset = small_dataset();
        let init = small_params();
        let bounds = ParamBounds::around(&init, &[0.5; CalibParams::DIM]).unwrap();
        let (problem, initial) =
            build_cocalib_problem(&dataset, &init, &bounds, &CocalibSolveOptions::default())
                .unwrap();

        let blocks = problem.initialize_parameter_blocks(&initial);
        let columns = problem.get_variable_name_to_col_idx_dict(&blocks);
        let dim: usize = blocks.values().map(|b| b.tangent_size()).sum();
        assert_eq!(dim, 3 + 3 + OmniIntrinsics::DIM);
        let structure = problem.build_symbolic_structure(&blocks, dim, &columns);

        let (residuals, jacobian) =
            problem.compute_residual_and_jacobian(&blocks, &columns, &structure);
        assert_eq!(residuals.nrows(), RESIDUAL_DIM * dataset.num_points());
        assert!((0..residuals.nrows()).all(|i| residuals[(i, 0)].is_finite()));
        assert!(jacobian.val().iter().all(|v| v.is_finite()));
        assert!(jacobian.val().iter().any(|v| *v != 0.0));
    }

    #[test]
    fn solver_runs_on_small_problem() {
        let dataset = small_dataset();
        let init = small_params();
        let bounds = ParamBounds::around(&init, &[0.5; CalibParams::DIM]).unwrap();
        let opts = CocalibSolveOptions {
            lock_intrinsics: true,
            q_lim: 0.05,
            ..CocalibSolveOptions::default()
        };
        let result =
            optimize_cocalib(&dataset, &init, &bounds, &opts, &TinySolveOptions::default())
                .unwrap();
        assert!(result.final_cost.is_finite());
        assert!(result.final_cost <= result.initial_cost + 1e-12);
        assert_eq!(result.params.intrinsics, init.intrinsics);
        assert_eq!(result.projections.len(), dataset.num_points());
    }
}
