//! Levenberg-Marquardt settings and cost evaluation for the co-calibration problem.
//!
//! Defaults follow the density fit: 200 iterations and a 1e-12 relative cost
//! decrease. Steps that raise the cost are always rejected; tiny-solver has no
//! non-monotonic mode. [`problem_cost`] scores a parameter map with the Huber loss
//! applied, which is how stage reports compare initial and final cost.

use anyhow::{anyhow, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiny_solver::linear::sparse::LinearSolverType;
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::LevenbergMarquardtOptimizer;

/// Iteration cap used for co-calibration.
pub const DEFAULT_MAX_ITERS: usize = 200;
/// Relative cost decrease below which the solver stops.
pub const DEFAULT_FUNCTION_TOLERANCE: f64 = 1e-12;

/// User-facing solver options mapped onto tiny-solver's optimizer settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TinySolveOptions {
    pub max_iters: usize,
    pub verbosity: usize,
    #[serde(skip)]
    pub linear_solver: Option<LinearSolverType>,
    pub min_abs_decrease: Option<f64>,
    pub min_rel_decrease: Option<f64>,
    pub min_error: Option<f64>,
}

impl std::fmt::Debug for TinySolveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinySolveOptions")
            .field("max_iters", &self.max_iters)
            .field("verbosity", &self.verbosity)
            .field("min_abs_decrease", &self.min_abs_decrease)
            .field("min_rel_decrease", &self.min_rel_decrease)
            .field("min_error", &self.min_error)
            .finish()
    }
}

impl Default for TinySolveOptions {
    fn default() -> Self {
        let defaults = OptimizerOptions::default();
        Self {
            max_iters: DEFAULT_MAX_ITERS,
            verbosity: defaults.verbosity_level,
            linear_solver: Some(defaults.linear_solver_type),
            min_abs_decrease: Some(defaults.min_abs_error_decrease_threshold),
            min_rel_decrease: Some(DEFAULT_FUNCTION_TOLERANCE),
            min_error: Some(defaults.min_error_threshold),
        }
    }
}

impl TinySolveOptions {
    fn to_optimizer_options(&self) -> OptimizerOptions {
        let mut opts = OptimizerOptions {
            max_iteration: self.max_iters,
            verbosity_level: self.verbosity,
            ..OptimizerOptions::default()
        };
        if let Some(solver) = self.linear_solver.clone() {
            opts.linear_solver_type = solver;
        }
        if let Some(v) = self.min_abs_decrease {
            opts.min_abs_error_decrease_threshold = v;
        }
        if let Some(v) = self.min_rel_decrease {
            opts.min_rel_error_decrease_threshold = v;
        }
        if let Some(v) = self.min_error {
            opts.min_error_threshold = v;
        }
        opts
    }
}

/// Run Levenberg-Marquardt from `initial`. `Err` means the solver produced no
/// solution; callers keep their starting point.
pub fn solve(
    problem: &Problem,
    initial: HashMap<String, DVector<f64>>,
    opts: &TinySolveOptions,
) -> Result<HashMap<String, DVector<f64>>> {
    let optimizer = LevenbergMarquardtOptimizer::default();
    let options = opts.to_optimizer_options();
    optimizer
        .optimize(problem, &initial, Some(options))
        .ok_or_else(|| anyhow!("tiny-solver failed to converge"))
}

/// `½‖r‖²` of the robustified residuals at `params`.
pub fn problem_cost(problem: &Problem, params: &HashMap<String, DVector<f64>>) -> f64 {
    let blocks = problem.initialize_parameter_blocks(params);
    let residuals = problem.compute_residuals(&blocks, true);
    0.5 * residuals.as_ref().squared_norm_l2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_onto_optimizer_options() {
        let opts = TinySolveOptions::default().to_optimizer_options();
        assert_eq!(opts.max_iteration, DEFAULT_MAX_ITERS);
        assert_eq!(opts.min_rel_error_decrease_threshold, DEFAULT_FUNCTION_TOLERANCE);

        let json = r#"{"max_iters": 7, "min_rel_decrease": 1e-6}"#;
        let parsed: TinySolveOptions = serde_json::from_str(json).unwrap();
        let opts = parsed.to_optimizer_options();
        assert_eq!(opts.max_iteration, 7);
        assert_eq!(opts.min_rel_error_decrease_threshold, 1e-6);
    }
}
