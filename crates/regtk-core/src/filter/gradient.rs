//! Image gradient in world units.

use rayon::prelude::*;
use crate::image::Volume;
use crate::spatial::{Vector, Vector3};

/// Central-difference gradient filter.
///
/// Differences are taken along the voxel axes and then mapped to world axes
/// with `D^-T * S^-1`. One-sided differences are used at the grid border and
/// next to padding; padded voxels get a zero gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientFilter {
    padding: Option<f32>,
}

impl GradientFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Compute the x, y and z world gradient components.
    pub fn apply(&self, volume: &Volume) -> [Volume; 3] {
        let geometry = volume.geometry().clone();
        let gradients: Vec<Vector3> = (0..volume.len())
            .into_par_iter()
            .map(|offset| self.gradient_at(volume, offset))
            .collect();

        std::array::from_fn(|axis| {
            Volume::from_fn(geometry.clone(), |offset| gradients[offset][axis] as f32)
        })
    }

    /// World gradient at one voxel.
    pub fn gradient_at(&self, volume: &Volume, offset: usize) -> Vector3 {
        let geometry = volume.geometry();
        let data = volume.data();
        let valid = |v: f32| self.padding.map_or(true, |p| v > p);

        let centre = data[offset];
        if !valid(centre) {
            return Vector3::zeros();
        }

        let dims = geometry.dims();
        let index = geometry.grid_index(offset);
        let mut index_gradient = Vector3::zeros();
        for axis in 0..3 {
            let neighbour = |step: isize| -> Option<f64> {
                let position = index[axis] as isize + step;
                if position < 0 || position >= dims[axis] as isize {
                    return None;
                }
                let mut at = index;
                at[axis] = position as usize;
                let v = data[geometry.linear_index(at[0], at[1], at[2])];
                valid(v).then_some(v as f64)
            };
            index_gradient[axis] = match (neighbour(-1), neighbour(1)) {
                (Some(lo), Some(hi)) => 0.5 * (hi - lo),
                (None, Some(hi)) => hi - centre as f64,
                (Some(lo), None) => centre as f64 - lo,
                (None, None) => 0.0,
            };
        }

        let spacing = geometry.spacing();
        let scaled = Vector3::new(std::array::from_fn(|a| index_gradient[a] / spacing[a]));
        Vector(geometry.inverse_direction().inner().transpose() * scaled.0)
    }
}
