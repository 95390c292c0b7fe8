//! Camera side: flatten the fisheye image and recover fisheye edge pixels.

use anyhow::{ensure, Context, Result};
use cocalib_core::{
    image_to_sphere, lookup_positions, rasterize, EdgePixelSet, EquirectangularRaster, OmniCamera,
    PixelSphereCloud, RasterSpec, Real, Vec2,
};
use image::{GrayImage, RgbImage};
use log::{info, warn};

/// Camera image lifted to the sphere and flattened.
#[derive(Debug, Clone)]
pub struct CameraFlat {
    pub cloud: PixelSphereCloud,
    pub raster: EquirectangularRaster,
    /// Pixels without a defined viewing direction.
    pub skipped_pixels: usize,
}

pub fn flatten_camera(
    image: &RgbImage,
    camera: &OmniCamera,
    spec: &RasterSpec,
) -> Result<CameraFlat> {
    let (cloud, skipped_pixels) =
        image_to_sphere(image, camera).context("lifting camera image to the sphere")?;
    let raster = rasterize(&cloud, spec).context("flattening camera sphere")?;
    Ok(CameraFlat {
        cloud,
        raster,
        skipped_pixels,
    })
}

/// Camera edges in the two frames the optimizer needs.
#[derive(Debug, Clone)]
pub struct CameraEdges {
    pub pixels: EdgePixelSet,
    /// Fisheye edge positions in the raw sensor frame (projection error).
    pub raw: Vec<Vec2>,
    /// Row-mirrored positions fed to the density estimator, whose grid stores rows
    /// in reverse query order.
    pub density_samples: Vec<Vec2>,
    pub invalid_lookups: usize,
}

/// Map the edge mask drawn on the camera raster back to fisheye pixels.
///
/// `flat` was built from the image as loaded; with `flip_vertical` its rows are
/// mirrored with respect to the raw sensor frame.
pub fn camera_edges(
    flat: &CameraFlat,
    mask: &GrayImage,
    threshold: u8,
    image_rows: usize,
    flip_vertical: bool,
) -> Result<CameraEdges> {
    let pixels = EdgePixelSet::from_raster_mask(mask, &flat.raster.spec, threshold)
        .context("camera edge mask")?;
    ensure!(
        !pixels.is_empty(),
        "camera edge mask has no pixel above {}",
        threshold
    );
    let lookup = lookup_positions(&pixels, &flat.raster.tags, &flat.cloud.positions)?;
    if lookup.invalid_lookups > 0 {
        warn!(
            "camera edges: {} of {} edge pixels have no source pixel",
            lookup.invalid_lookups,
            pixels.len()
        );
    }
    ensure!(
        !lookup.positions.is_empty(),
        "no camera edge pixel maps back to the fisheye image"
    );

    let last = image_rows.saturating_sub(1) as Real;
    let mirror = |p: &Vec2| Vec2::new(last - p.x, p.y);
    let raw: Vec<Vec2> = if flip_vertical {
        lookup.positions.iter().map(mirror).collect()
    } else {
        lookup.positions.clone()
    };
    let density_samples = raw.iter().map(mirror).collect();
    info!(
        "camera edges: {} raster pixels -> {} fisheye pixels",
        pixels.len(),
        raw.len()
    );

    Ok(CameraEdges {
        pixels,
        raw,
        density_samples,
        invalid_lookups: lookup.invalid_lookups,
    })
}
