use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use crate::image::Image;

/// Downsample filter.
///
/// Reduces the image size by integer factors by keeping every Nth voxel,
/// starting at index 0 so the origin is unchanged. Spacing grows by the factor.
pub struct DownsampleFilter<B: Backend> {
    factors: Vec<usize>,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> DownsampleFilter<B> {
    /// Create a new downsample filter.
    ///
    /// # Arguments
    /// * `factors` - Factor per axis; a single value applies to all axes
    pub fn new(factors: Vec<usize>) -> Self {
        Self {
            factors,
            _b: std::marker::PhantomData,
        }
    }

    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let mut data = image.data().clone();
        let device = data.device();
        let dims: [usize; D] = data.dims();
        let mut spacing = *image.spacing();

        for d in 0..D {
            let factor = self.factors.get(d).copied().unwrap_or(self.factors[0]);
            if factor <= 1 {
                continue;
            }
            let indices: Vec<i32> = (0..dims[d]).step_by(factor).map(|x| x as i32).collect();
            let indices = Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device);
            data = data.select(d, indices);
            spacing[d] *= factor as f64;
        }

        Image::new(data, *image.origin(), spacing, *image.direction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use crate::image::ImageGeometry;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_downsample_matches_shrunk_geometry() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([5, 4, 3]).unwrap();
        let voxels: Vec<f32> = (0..60).map(|v| v as f32).collect();
        let image = Image::<TestBackend, 3>::from_voxels(voxels, &geometry, &device).unwrap();

        let small = DownsampleFilter::new(vec![2]).apply(&image);
        let expected = geometry.shrink([2, 2, 2]).unwrap();
        assert_eq!(small.geometry().unwrap(), expected);

        let volume = small.to_volume().unwrap();
        assert_eq!(volume.get(1, 1, 1), geometry.linear_index(2, 2, 2) as f32);
        assert_eq!(volume.get(2, 0, 0), geometry.linear_index(4, 0, 0) as f32);
    }

    #[test]
    fn test_unit_factor_is_identity() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([3, 3, 3]).unwrap();
        let image = Image::<TestBackend, 3>::from_voxels(vec![1.0; 27], &geometry, &device).unwrap();
        let same = DownsampleFilter::new(vec![1, 1, 1]).apply(&image);
        assert_eq!(same.shape(), [3, 3, 3]);
        assert_eq!(same.spacing(), image.spacing());
    }
}
