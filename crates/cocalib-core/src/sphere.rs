//! Coloured point clouds on the viewing sphere.
//!
//! Each [`SphericalPoint`] keeps the source position it came from (a fisheye
//! pixel for the camera, a 3D point for the LiDAR) so raster cells can be traced
//! back to concrete source data.

use crate::{CoreError, CoreResult, OmniCamera, Real, SphericalDir, Vec2, Vec3, VecN};
use image::RgbImage;
use log::{debug, info};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalPoint {
    pub theta: Real,
    pub phi: Real,
    pub color: [u8; 3],
}

/// Spherical points plus their `D`-dimensional source positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SphericalCloud<const D: usize> {
    pub points: Vec<SphericalPoint>,
    pub positions: Vec<VecN<D>>,
}

/// Camera cloud: source positions are fisheye pixels `(u, v)`.
pub type PixelSphereCloud = SphericalCloud<2>;
/// LiDAR cloud: source positions are points in the LiDAR frame.
pub type PointSphereCloud = SphericalCloud<3>;

impl<const D: usize> SphericalCloud<D> {
    pub fn new(points: Vec<SphericalPoint>, positions: Vec<VecN<D>>) -> CoreResult<Self> {
        if points.len() != positions.len() {
            return Err(CoreError::LengthMismatch {
                what: "source positions",
                expected: points.len(),
                actual: positions.len(),
            });
        }
        Ok(Self { points, positions })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Lift every pixel of `image` to the sphere. Pixels on the principal point are
/// skipped; the second return value counts them.
pub fn image_to_sphere(image: &RgbImage, camera: &OmniCamera) -> CoreResult<(PixelSphereCloud, usize)> {
    let (cols, rows) = image.dimensions();
    if rows == 0 || cols == 0 {
        return Err(CoreError::EmptyCloud);
    }

    let per_row: Vec<(Vec<SphericalPoint>, Vec<Vec2>, usize)> = (0..rows)
        .into_par_iter()
        .map(|u| {
            let mut points = Vec::with_capacity(cols as usize);
            let mut pixels = Vec::with_capacity(cols as usize);
            let mut skipped = 0;
            for v in 0..cols {
                let pixel = Vec2::new(u as Real, v as Real);
                match camera.unproject(&pixel) {
                    Some(SphericalDir { theta, phi }) => {
                        points.push(SphericalPoint {
                            theta,
                            phi,
                            color: image.get_pixel(v, u).0,
                        });
                        pixels.push(pixel);
                    }
                    None => skipped += 1,
                }
            }
            (points, pixels, skipped)
        })
        .collect();

    let mut cloud = PixelSphereCloud::default();
    let mut skipped = 0;
    for (points, pixels, row_skipped) in per_row {
        cloud.points.extend(points);
        cloud.positions.extend(pixels);
        skipped += row_skipped;
    }
    debug!(
        "image_to_sphere: {} points, {} undefined pixels skipped",
        cloud.len(),
        skipped
    );
    Ok((cloud, skipped))
}

/// Lift LiDAR points to the sphere around the sensor origin.
///
/// `intensities` become gray colours (clamped to `[0, 255]`); without them every
/// point is white. Points at the origin are skipped.
pub fn points_to_sphere(points: &[Vec3], intensities: Option<&[f32]>) -> CoreResult<PointSphereCloud> {
    if points.is_empty() {
        return Err(CoreError::EmptyCloud);
    }
    if let Some(values) = intensities {
        if values.len() != points.len() {
            return Err(CoreError::LengthMismatch {
                what: "point intensities",
                expected: points.len(),
                actual: values.len(),
            });
        }
    }

    let mut cloud = PointSphereCloud::default();
    for (idx, p) in points.iter().enumerate() {
        let Some(dir) = SphericalDir::from_vector(p) else {
            continue;
        };
        let gray = intensities.map_or(255, |v| v[idx].clamp(0.0, 255.0) as u8);
        cloud.points.push(SphericalPoint {
            theta: dir.theta,
            phi: dir.phi,
            color: [gray; 3],
        });
        cloud.positions.push(*p);
    }
    if cloud.is_empty() {
        return Err(CoreError::EmptyCloud);
    }
    info!(
        "points_to_sphere: {} of {} points lifted",
        cloud.len(),
        points.len()
    );
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InverseModelKind, OmniIntrinsics};
    use image::Rgb;

    #[test]
    fn image_lift_keeps_pixels_and_colours() {
        let k = OmniIntrinsics {
            u0: 2.0,
            v0: 3.0,
            a0: 0.0,
            a1: 4.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
            c: 1.0,
            d: 0.0,
            e: 0.0,
        };
        let cam = OmniCamera::new(k, InverseModelKind::Spline).unwrap();
        let mut img = RgbImage::new(6, 5);
        img.put_pixel(4, 1, Rgb([10, 20, 30]));

        let (cloud, skipped) = image_to_sphere(&img, &cam).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(cloud.len(), 29);
        let idx = cloud
            .positions
            .iter()
            .position(|p| p.x == 1.0 && p.y == 4.0)
            .unwrap();
        assert_eq!(cloud.points[idx].color, [10, 20, 30]);
    }

    #[test]
    fn lidar_lift_skips_origin() {
        let pts = vec![Vec3::new(1.0, 0.0, 0.0), Vec3::zeros(), Vec3::new(0.0, 0.0, 2.0)];
        let cloud = points_to_sphere(&pts, Some(&[10.0, 20.0, 300.0])).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points[1].color, [255; 3]);
        assert!((cloud.points[0].theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(cloud.points[1].theta.abs() < 1e-12);
        assert_eq!(cloud.positions[1], Vec3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn empty_lidar_cloud_fails() {
        assert_eq!(points_to_sphere(&[], None), Err(CoreError::EmptyCloud));
        assert!(matches!(
            points_to_sphere(&[Vec3::x()], Some(&[])),
            Err(CoreError::LengthMismatch { .. })
        ));
    }
}
