//! Serde configuration and input documents for a co-calibration run.

use anyhow::{ensure, Context, Result};
use cocalib_core::{
    EdgePixelSet, EffectiveRadius, ImageSize, InverseModelKind, RasterSpec, Real,
};
use cocalib_optim::{
    default_sweeps, CalibParams, CocalibSolveOptions, ParamBounds, SweepSpec, TinySolveOptions,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Half-widths of the default search box around the initial parameters, in the
/// external layout `[rx, ry, rz, tx, ty, tz, u0, v0, a0, a1, a2, a3, a4, c, d, e]`.
pub const DEFAULT_HALF_WIDTHS: [Real; CalibParams::DIM] = [
    0.05, 0.05, 0.05, 0.1, 0.1, 0.1, 5.0, 5.0, 5.0, 1.0, 1e-3, 1e-6, 1e-8, 0.01, 0.01, 0.01,
];

/// Decreasing bandwidth schedule; each stage starts from the previous result.
pub const DEFAULT_BANDWIDTHS: [Real; 3] = [16.0, 8.0, 4.0];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub rows: usize,
    pub cols: usize,
    pub effective_radius: EffectiveRadius,
    /// The raw camera image is stored upside down and is flipped before flattening.
    pub flip_vertical: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let size = ImageSize::default();
        Self {
            rows: size.rows,
            cols: size.cols,
            effective_radius: EffectiveRadius::default(),
            flip_vertical: true,
        }
    }
}

impl SensorConfig {
    pub fn image_size(&self) -> ImageSize {
        ImageSize {
            rows: self.rows,
            cols: self.cols,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Raster width; the height is half of it.
    pub cols: usize,
    pub inverse_model: InverseModelKind,
    /// Also flatten every fusion image (slow on full-size images).
    pub flatten_fusion: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            cols: RasterSpec::DEFAULT_COLS,
            inverse_model: InverseModelKind::default(),
            flatten_fusion: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Mask values strictly above this mark edges.
    pub threshold: u8,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            threshold: EdgePixelSet::DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DensitySettings {
    pub scale: Real,
    pub rel_error: Real,
    /// Dump every density grid as `x\ty\tdensity` text.
    pub write_grid: bool,
}

impl Default for DensitySettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rel_error: 0.05,
            write_grid: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub solve: CocalibSolveOptions,
    pub solver: TinySolveOptions,
}

/// Box constraints, either explicit or as half-widths around the initial values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundsConfig {
    HalfWidths { values: Vec<Real> },
    Explicit { lower: Vec<Real>, upper: Vec<Real> },
}

impl Default for BoundsConfig {
    fn default() -> Self {
        BoundsConfig::HalfWidths {
            values: DEFAULT_HALF_WIDTHS.to_vec(),
        }
    }
}

impl BoundsConfig {
    pub fn resolve(&self, initial: &CalibParams) -> Result<ParamBounds> {
        match self {
            BoundsConfig::HalfWidths { values } => ParamBounds::around(initial, values),
            BoundsConfig::Explicit { lower, upper } => {
                ParamBounds::new(lower.clone(), upper.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    pub enabled: bool,
    /// Each entry is one slice; several specs in an entry sweep their cartesian grid.
    pub sweeps: Vec<Vec<SweepSpec>>,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sweeps: default_sweeps(),
        }
    }
}

/// Complete configuration of a co-calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CocalibConfig {
    /// Tag attached to log lines and error messages.
    pub run_id: String,
    pub sensor: SensorConfig,
    pub raster: RasterConfig,
    pub edges: EdgeConfig,
    pub density: DensitySettings,
    pub bandwidths: Vec<Real>,
    pub optim: OptimConfig,
    /// Initial parameters in the external layout.
    pub initial: Vec<Real>,
    pub bounds: BoundsConfig,
    pub sensitivity: SensitivityConfig,
}

impl Default for CocalibConfig {
    fn default() -> Self {
        Self {
            run_id: "cocalib".to_string(),
            sensor: SensorConfig::default(),
            raster: RasterConfig::default(),
            edges: EdgeConfig::default(),
            density: DensitySettings::default(),
            bandwidths: DEFAULT_BANDWIDTHS.to_vec(),
            optim: OptimConfig::default(),
            initial: CalibParams::default().to_vec(),
            bounds: BoundsConfig::default(),
            sensitivity: SensitivityConfig::default(),
        }
    }
}

impl CocalibConfig {
    pub fn initial_params(&self) -> Result<CalibParams> {
        CalibParams::from_slice(&self.initial)
            .with_context(|| format!("[{}] initial parameters", self.run_id))
    }

    pub fn param_bounds(&self) -> Result<ParamBounds> {
        let initial = self.initial_params()?;
        self.bounds
            .resolve(&initial)
            .with_context(|| format!("[{}] parameter bounds", self.run_id))
    }

    pub fn raster_spec(&self) -> Result<RasterSpec> {
        RasterSpec::from_cols(self.raster.cols)
            .with_context(|| format!("[{}] raster shape", self.run_id))
    }

    /// Check every precondition that does not need the input files.
    pub fn validate(&self) -> Result<()> {
        let id = &self.run_id;
        ensure!(
            self.sensor.rows > 0 && self.sensor.cols > 0,
            "[{id}] sensor size must be non-zero (got {}x{})",
            self.sensor.rows,
            self.sensor.cols
        );
        let r = &self.sensor.effective_radius;
        ensure!(
            r.inner >= 0.0 && r.inner < r.outer,
            "[{id}] effective radius needs 0 <= inner < outer (got [{}, {}])",
            r.inner,
            r.outer
        );
        ensure!(!self.bandwidths.is_empty(), "[{id}] bandwidth schedule is empty");
        for bw in &self.bandwidths {
            ensure!(
                bw.is_finite() && *bw > 0.0,
                "[{id}] bandwidth must be positive (got {bw})"
            );
        }
        self.raster_spec()?;
        let initial = self.initial_params()?;
        initial
            .intrinsics
            .validate()
            .with_context(|| format!("[{id}] initial intrinsics"))?;
        let bounds = self.param_bounds()?;
        let values = initial.to_vec();
        for (i, v) in values.iter().enumerate().skip(3) {
            ensure!(
                *v >= bounds.lower[i] && *v <= bounds.upper[i],
                "[{id}] initial {} = {} lies outside [{}, {}]",
                CalibParams::NAMES[i],
                v,
                bounds.lower[i],
                bounds.upper[i]
            );
        }
        Ok(())
    }
}

/// Where the LiDAR edge points come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LidarSource {
    /// Registered LiDAR edge points, one `x y z` per line.
    EdgePoints { path: PathBuf },
    /// Dense LiDAR cloud (`x y z [intensity]` per line) plus the edge mask drawn
    /// on its flat raster. The mask is only needed for calibration.
    Cloud {
        path: PathBuf,
        #[serde(default)]
        edge_mask: Option<PathBuf>,
    },
}

/// Input file paths of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocalibInput {
    /// Raw camera image, as stored by the sensor.
    pub camera_image: PathBuf,
    /// Edge detector output on the camera flat raster; only needed for calibration.
    #[serde(default)]
    pub camera_edge_mask: Option<PathBuf>,
    pub lidar: LidarSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = CocalibConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.initial.len(), CalibParams::DIM);
        assert_eq!(cfg.raster_spec().unwrap().rows, 2000);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: CocalibConfig = serde_json::from_str(
            r#"{ "run_id": "lab", "bandwidths": [8.0], "sensor": { "rows": 100 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.run_id, "lab");
        assert_eq!(cfg.bandwidths, vec![8.0]);
        assert_eq!(cfg.sensor.rows, 100);
        assert_eq!(cfg.sensor.cols, 2448);
        assert_eq!(cfg.edges.threshold, 127);
        assert_eq!(cfg.optim.solver.max_iters, 200);
    }

    #[test]
    fn validation_names_the_run() {
        let cfg = CocalibConfig {
            run_id: "bad-run".into(),
            bandwidths: vec![],
            ..CocalibConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("bad-run"));

        let cfg = CocalibConfig {
            initial: vec![0.0; 5],
            ..CocalibConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn explicit_bounds_must_contain_initial() {
        let initial = CalibParams::default().to_vec();
        let cfg = CocalibConfig {
            bounds: BoundsConfig::Explicit {
                lower: initial.iter().map(|v| v - 1.0).collect(),
                upper: initial.iter().map(|v| v + 1.0).collect(),
            },
            ..CocalibConfig::default()
        };
        cfg.validate().unwrap();

        let mut lower: Vec<Real> = initial.iter().map(|v| v - 1.0).collect();
        lower[3] = 0.5;
        let cfg = CocalibConfig {
            bounds: BoundsConfig::Explicit {
                lower,
                upper: initial.iter().map(|v| v + 1.0).collect(),
            },
            ..CocalibConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn lidar_source_is_tagged() {
        let src: LidarSource =
            serde_json::from_str(r#"{ "kind": "cloud", "path": "scan.txt" }"#).unwrap();
        match src {
            LidarSource::Cloud { path, edge_mask } => {
                assert_eq!(path, PathBuf::from("scan.txt"));
                assert!(edge_mask.is_none());
            }
            _ => panic!("expected a cloud source"),
        }
    }
}
