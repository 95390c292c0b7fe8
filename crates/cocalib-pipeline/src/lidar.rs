//! LiDAR side: flatten the cloud and recover 3D edge points.

use anyhow::{ensure, Context, Result};
use cocalib_core::{
    lookup_positions, points_to_sphere, rasterize, EdgePixelSet, EquirectangularRaster,
    PointSphereCloud, RasterSpec, Vec3,
};
use image::GrayImage;
use log::{info, warn};

#[derive(Debug, Clone)]
pub struct LidarFlat {
    pub cloud: PointSphereCloud,
    pub raster: EquirectangularRaster,
}

pub fn flatten_lidar(
    points: &[Vec3],
    intensities: Option<&[f32]>,
    spec: &RasterSpec,
) -> Result<LidarFlat> {
    let cloud = points_to_sphere(points, intensities).context("lifting LiDAR cloud to the sphere")?;
    let raster = rasterize(&cloud, spec).context("flattening LiDAR sphere")?;
    Ok(LidarFlat { cloud, raster })
}

#[derive(Debug, Clone)]
pub struct LidarEdges {
    pub pixels: EdgePixelSet,
    /// Averaged LiDAR-frame position per resolved edge pixel.
    pub points: Vec<Vec3>,
    pub invalid_lookups: usize,
}

/// Map the edge mask drawn on the LiDAR raster back to 3D points.
pub fn lidar_edges(flat: &LidarFlat, mask: &GrayImage, threshold: u8) -> Result<LidarEdges> {
    let pixels = EdgePixelSet::from_raster_mask(mask, &flat.raster.spec, threshold)
        .context("LiDAR edge mask")?;
    ensure!(
        !pixels.is_empty(),
        "LiDAR edge mask has no pixel above {}",
        threshold
    );
    let lookup = lookup_positions(&pixels, &flat.raster.tags, &flat.cloud.positions)?;
    if lookup.invalid_lookups > 0 {
        warn!(
            "LiDAR edges: {} of {} edge pixels have no source point",
            lookup.invalid_lookups,
            pixels.len()
        );
    }
    ensure!(
        !lookup.positions.is_empty(),
        "no LiDAR edge pixel maps back to the cloud"
    );
    info!(
        "LiDAR edges: {} raster pixels -> {} points",
        pixels.len(),
        lookup.positions.len()
    );
    Ok(LidarEdges {
        pixels,
        points: lookup.positions,
        invalid_lookups: lookup.invalid_lookups,
    })
}
