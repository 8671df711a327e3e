//! Sampling of volumes at continuous voxel indices.

pub mod trait_;
pub mod linear;
pub mod nearest;

use serde::{Deserialize, Serialize};
use crate::image::Volume;
use crate::spatial::Point3;

pub use trait_::Interpolator;
pub use linear::LinearInterpolator;
pub use nearest::NearestNeighborInterpolator;

/// Interpolation scheme selector, stored in registration configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationMode {
    NearestNeighbor,
    #[default]
    Linear,
}

impl Interpolator for InterpolationMode {
    fn interpolate(&self, volume: &Volume, index: &Point3) -> Option<f64> {
        match self {
            Self::NearestNeighbor => NearestNeighborInterpolator.interpolate(volume, index),
            Self::Linear => LinearInterpolator.interpolate(volume, index),
        }
    }

    fn interpolate_padded(&self, volume: &Volume, index: &Point3, padding: f32) -> Option<f64> {
        match self {
            Self::NearestNeighbor => NearestNeighborInterpolator.interpolate_padded(volume, index, padding),
            Self::Linear => LinearInterpolator.interpolate_padded(volume, index, padding),
        }
    }
}
