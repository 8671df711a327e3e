//! Host-side voxel buffer with geometry.

use rayon::prelude::*;
use crate::error::{Result, TransformError};
use super::ImageGeometry;

/// Contiguous `f32` voxel buffer plus the grid it samples.
///
/// Registration working copies (transformed source, gradients, masks) are
/// volumes on the target grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    geometry: ImageGeometry,
    data: Vec<f32>,
}

impl Volume {
    pub fn new(geometry: ImageGeometry, data: Vec<f32>) -> Result<Self> {
        if data.len() != geometry.voxel_count() {
            return Err(TransformError::tensor_data(format!(
                "volume buffer has {} voxels, geometry needs {}",
                data.len(),
                geometry.voxel_count()
            )));
        }
        Ok(Self { geometry, data })
    }

    /// Volume with every voxel set to `value`.
    pub fn filled(geometry: ImageGeometry, value: f32) -> Self {
        let data = vec![value; geometry.voxel_count()];
        Self { geometry, data }
    }

    /// Volume whose voxels are computed from their linear offset.
    pub fn from_fn<F>(geometry: ImageGeometry, f: F) -> Self
    where
        F: Fn(usize) -> f32 + Sync + Send,
    {
        let data = (0..geometry.voxel_count()).into_par_iter().map(f).collect();
        Self { geometry, data }
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data[self.geometry.linear_index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f32) {
        let offset = self.geometry.linear_index(i, j, k);
        self.data[offset] = value;
    }

    /// Minimum and maximum over voxels strictly above `padding`.
    ///
    /// Returns `None` when no voxel qualifies.
    pub fn min_max(&self, padding: Option<f32>) -> Option<(f32, f32)> {
        let threshold = padding.unwrap_or(f32::NEG_INFINITY);
        self.data
            .par_iter()
            .copied()
            .filter(|&v| v > threshold && v.is_finite())
            .fold(
                || None,
                |acc: Option<(f32, f32)>, v| match acc {
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                    None => Some((v, v)),
                },
            )
            .reduce(
                || None,
                |a, b| match (a, b) {
                    (Some((alo, ahi)), Some((blo, bhi))) => Some((alo.min(blo), ahi.max(bhi))),
                    (a, None) => a,
                    (None, b) => b,
                },
            )
    }
}
