//! Interpolator trait for sampling values at continuous coordinates.

use crate::image::Volume;
use crate::spatial::Point3;

/// Samples a volume at a continuous voxel index.
///
/// Implementations return `None` when the index lies outside the region the
/// scheme can evaluate. Callers treat such samples as outside the overlap.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, volume: &Volume, index: &Point3) -> Option<f64>;

    /// Like [`interpolate`](Self::interpolate), but `None` whenever a voxel
    /// contributing to the sample is at or below `padding`.
    fn interpolate_padded(&self, volume: &Volume, index: &Point3, padding: f32) -> Option<f64>;

    /// Sample at a world position.
    fn interpolate_world(&self, volume: &Volume, point: &Point3) -> Option<f64> {
        let index = volume.geometry().world_to_index(point);
        self.interpolate(volume, &index)
    }
}
