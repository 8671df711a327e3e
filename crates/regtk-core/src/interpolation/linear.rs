//! Trilinear interpolation.

use crate::image::Volume;
use crate::spatial::Point3;
use super::trait_::Interpolator;

/// Trilinear interpolator.
///
/// Defined on `[0, n-1]` along each axis. Axes with a single voxel only
/// accept index 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

/// Lower corner and fractional offset along one axis.
fn axis_cell(x: f64, n: usize) -> Option<(usize, f64)> {
    const TOLERANCE: f64 = 1e-6;
    let upper = (n - 1) as f64;
    if !(x >= -TOLERANCE && x <= upper + TOLERANCE) {
        return None;
    }
    if n == 1 {
        return Some((0, 0.0));
    }
    let x = x.clamp(0.0, upper);
    let base = (x.floor() as usize).min(n - 2);
    Some((base, x - base as f64))
}

impl LinearInterpolator {
    /// Weighted sum over the 2x2x2 cell; voxels with zero weight are not read.
    fn sample(volume: &Volume, index: &Point3, padding: Option<f32>) -> Option<f64> {
        let dims = volume.geometry().dims();
        let (i, fx) = axis_cell(index[0], dims[0])?;
        let (j, fy) = axis_cell(index[1], dims[1])?;
        let (k, fz) = axis_cell(index[2], dims[2])?;

        let step = |n: usize| usize::from(n > 1);
        let (di, dj, dk) = (step(dims[0]), step(dims[1]), step(dims[2]));

        let mut value = 0.0;
        for (a, wx) in [(0, 1.0 - fx), (di, fx)] {
            for (b, wy) in [(0, 1.0 - fy), (dj, fy)] {
                for (c, wz) in [(0, 1.0 - fz), (dk, fz)] {
                    let w = wx * wy * wz;
                    if w == 0.0 {
                        continue;
                    }
                    let v = volume.get(i + a, j + b, k + c);
                    if padding.is_some_and(|p| v <= p) {
                        return None;
                    }
                    value += w * v as f64;
                }
            }
        }
        Some(value)
    }
}

impl Interpolator for LinearInterpolator {
    fn interpolate(&self, volume: &Volume, index: &Point3) -> Option<f64> {
        Self::sample(volume, index, None)
    }

    fn interpolate_padded(&self, volume: &Volume, index: &Point3, padding: f32) -> Option<f64> {
        Self::sample(volume, index, Some(padding))
    }
}
