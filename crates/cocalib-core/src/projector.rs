//! Projection of LiDAR edge points into the fisheye image and fusion rendering.

use crate::{project_omni, Extrinsics, OmniIntrinsics, Real, Vec2, Vec3};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub rows: usize,
    pub cols: usize,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            rows: 2048,
            cols: 2448,
        }
    }
}

/// Annulus around the principal point in which projections are scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveRadius {
    pub inner: Real,
    pub outer: Real,
}

impl Default for EffectiveRadius {
    fn default() -> Self {
        Self {
            inner: 300.0,
            outer: 1100.0,
        }
    }
}

impl EffectiveRadius {
    /// Strictly inside the band: `inner² < ‖pixel − principal‖² < outer²`.
    pub fn contains(&self, pixel: &Vec2, principal: &Vec2) -> bool {
        let d2 = (pixel - principal).norm_squared();
        d2 > self.inner * self.inner && d2 < self.outer * self.outer
    }
}

pub const FUSION_MARK: [u8; 3] = [0, 255, 0];

/// Transform LiDAR-frame points into the camera and project them, unclamped.
pub fn project_points(
    extrinsics: &Extrinsics,
    intrinsics: &OmniIntrinsics,
    points: &[Vec3],
) -> Vec<Vec2> {
    let k = intrinsics.to_array();
    points
        .iter()
        .map(|p| project_omni(&k, &extrinsics.transform_point(p)))
        .collect()
}

/// Mark projections that fall inside the annulus on a copy of `reference`.
///
/// Pixel positions are clamped to the image for drawing only.
pub fn render_fusion(
    reference: &RgbImage,
    projections: &[Vec2],
    intrinsics: &OmniIntrinsics,
    radius: &EffectiveRadius,
) -> RgbImage {
    let mut out = reference.clone();
    let (cols, rows) = out.dimensions();
    if rows == 0 || cols == 0 {
        return out;
    }
    let principal = intrinsics.principal_point();
    for px in projections {
        if !px.x.is_finite() || !px.y.is_finite() || !radius.contains(px, &principal) {
            continue;
        }
        let u = px.x.round().clamp(0.0, (rows - 1) as Real) as u32;
        let v = px.y.round().clamp(0.0, (cols - 1) as Real) as u32;
        out.put_pixel(v, u, Rgb(FUSION_MARK));
    }
    out
}
