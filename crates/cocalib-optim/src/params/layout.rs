//! Named parameter blocks and the external parameter layout.

use anyhow::{ensure, Result};
use cocalib_core::{Extrinsics, OmniIntrinsics, Real};
use serde::{Deserialize, Serialize};

/// Solver-side parameter blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamBlock {
    Rotation,
    Translation,
    Intrinsics,
}

impl ParamBlock {
    pub const ALL: [ParamBlock; 3] = [
        ParamBlock::Rotation,
        ParamBlock::Translation,
        ParamBlock::Intrinsics,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ParamBlock::Rotation => "rotation",
            ParamBlock::Translation => "translation",
            ParamBlock::Intrinsics => "intrinsics",
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            ParamBlock::Rotation => 4,
            ParamBlock::Translation => 3,
            ParamBlock::Intrinsics => OmniIntrinsics::DIM,
        }
    }

    /// Offset of the block's first entry in the external layout.
    ///
    /// The rotation block maps onto the three Euler angles.
    pub fn external_offset(&self) -> usize {
        match self {
            ParamBlock::Rotation => 0,
            ParamBlock::Translation => 3,
            ParamBlock::Intrinsics => Extrinsics::DIM,
        }
    }
}

/// Extrinsics plus intrinsics, convertible to the external 16-entry layout.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibParams {
    pub extrinsics: Extrinsics,
    pub intrinsics: OmniIntrinsics,
}

impl CalibParams {
    pub const DIM: usize = Extrinsics::DIM + OmniIntrinsics::DIM;
    pub const NAMES: [&'static str; Self::DIM] = [
        "rx", "ry", "rz", "tx", "ty", "tz", "u0", "v0", "a0", "a1", "a2", "a3", "a4", "c", "d",
        "e",
    ];

    pub fn new(extrinsics: Extrinsics, intrinsics: OmniIntrinsics) -> Self {
        Self {
            extrinsics,
            intrinsics,
        }
    }

    pub fn from_slice(v: &[Real]) -> Result<Self> {
        ensure!(
            v.len() == Self::DIM,
            "expected {} parameters, got {}",
            Self::DIM,
            v.len()
        );
        let mut ext = [0.0; Extrinsics::DIM];
        ext.copy_from_slice(&v[..Extrinsics::DIM]);
        Ok(Self {
            extrinsics: Extrinsics::from_euler_translation(ext),
            intrinsics: OmniIntrinsics::from_slice(&v[Extrinsics::DIM..])?,
        })
    }

    pub fn to_vec(&self) -> Vec<Real> {
        let mut v = Vec::with_capacity(Self::DIM);
        v.extend_from_slice(&self.extrinsics.to_euler_translation());
        v.extend_from_slice(&self.intrinsics.to_array());
        v
    }

    /// Copy with external entry `idx` replaced by `value`.
    pub fn with_value(&self, idx: usize, value: Real) -> Result<Self> {
        ensure!(idx < Self::DIM, "parameter index {} out of range", idx);
        let mut v = self.to_vec();
        v[idx] = value;
        Self::from_slice(&v)
    }
}

/// Per-parameter box constraints in the external layout.
///
/// Rotation entries are not used by the solver; the quaternion is bounded around
/// its initial value instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub lower: Vec<Real>,
    pub upper: Vec<Real>,
}

impl ParamBounds {
    pub fn new(lower: Vec<Real>, upper: Vec<Real>) -> Result<Self> {
        let bounds = Self { lower, upper };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Symmetric box of half-widths `delta` around `center`.
    pub fn around(center: &CalibParams, delta: &[Real]) -> Result<Self> {
        ensure!(
            delta.len() == CalibParams::DIM,
            "expected {} half-widths, got {}",
            CalibParams::DIM,
            delta.len()
        );
        let c = center.to_vec();
        Self::new(
            c.iter().zip(delta).map(|(v, d)| v - d).collect(),
            c.iter().zip(delta).map(|(v, d)| v + d).collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.lower.len() == CalibParams::DIM && self.upper.len() == CalibParams::DIM,
            "bounds need {} entries (got lower {}, upper {})",
            CalibParams::DIM,
            self.lower.len(),
            self.upper.len()
        );
        for (i, (lo, hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            ensure!(
                lo <= hi,
                "lower bound {} exceeds upper bound {} for {}",
                lo,
                hi,
                CalibParams::NAMES[i]
            );
        }
        Ok(())
    }

    /// `(lower, upper)` for entry `i` of a solver block.
    pub fn block(&self, block: ParamBlock, i: usize) -> (Real, Real) {
        let idx = block.external_offset() + i;
        (self.lower[idx], self.upper[idx])
    }

    pub fn translation(&self, i: usize) -> (Real, Real) {
        self.block(ParamBlock::Translation, i)
    }

    pub fn intrinsic(&self, i: usize) -> (Real, Real) {
        self.block(ParamBlock::Intrinsics, i)
    }
}
