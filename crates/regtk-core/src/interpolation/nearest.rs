//! Nearest neighbor interpolation.

use crate::image::Volume;
use crate::spatial::Point3;
use super::trait_::Interpolator;

/// Nearest neighbor interpolator, defined on `[-0.5, n-0.5)` along each axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl NearestNeighborInterpolator {
    fn nearest(volume: &Volume, index: &Point3) -> Option<f32> {
        let dims = volume.geometry().dims();
        let mut nearest = [0usize; 3];
        for axis in 0..3 {
            let rounded = (index[axis] + 0.5).floor();
            if !(rounded >= 0.0 && rounded < dims[axis] as f64) {
                return None;
            }
            nearest[axis] = rounded as usize;
        }
        Some(volume.get(nearest[0], nearest[1], nearest[2]))
    }
}

impl Interpolator for NearestNeighborInterpolator {
    fn interpolate(&self, volume: &Volume, index: &Point3) -> Option<f64> {
        Self::nearest(volume, index).map(f64::from)
    }

    fn interpolate_padded(&self, volume: &Volume, index: &Point3, padding: f32) -> Option<f64> {
        Self::nearest(volume, index).filter(|&v| v > padding).map(f64::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGeometry;

    #[test]
    fn test_nearest_lookup() {
        let geometry = ImageGeometry::with_dims([3, 1, 1]).unwrap();
        let volume = Volume::new(geometry, vec![5.0, 6.0, 7.0]).unwrap();
        let sample = |x: f64| NearestNeighborInterpolator.interpolate(&volume, &Point3::new([x, 0.0, 0.0]));

        assert_eq!(sample(0.49), Some(5.0));
        assert_eq!(sample(0.5), Some(6.0));
        assert_eq!(sample(2.4), Some(7.0));
        assert_eq!(sample(-0.5), Some(5.0));
        assert_eq!(sample(-0.6), None);
        assert_eq!(sample(2.5), None);

        let padded = |x: f64| NearestNeighborInterpolator.interpolate_padded(&volume, &Point3::new([x, 0.0, 0.0]), 5.0);
        assert_eq!(padded(0.2), None);
        assert_eq!(padded(0.7), Some(6.0));
    }
}
