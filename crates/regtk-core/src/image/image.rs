//! Image type with physical metadata.
//!
//! An [`Image`] keeps its voxels in a burn tensor so filters can run on any
//! backend. Registration loops read voxels many times at arbitrary positions,
//! so they work on a host [`Volume`] snapshot obtained with [`Image::to_volume`].

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use crate::error::{Result, TransformError};
use crate::spatial::{Direction, Point, Spacing, Vector};
use super::{ImageGeometry, Volume};

/// Scalar image with physical metadata.
///
/// # Type Parameters
/// * `B` - The backend for tensor operations
/// * `D` - The dimensionality of the image
///
/// # Coordinate Systems
/// * **Index Space**: continuous voxel indices, tensor axis `d` is index axis `d`
/// * **Physical Space**: world coordinates in mm
///
/// # Examples
/// ```rust
/// use regtk_core::Image;
/// use regtk_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let image = Image::new(data, Point3::origin(), Spacing3::uniform(1.0), Direction3::identity());
/// assert_eq!(image.shape(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    data: Tensor<B, D>,
    origin: Point<D>,
    spacing: Spacing<D>,
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    ///
    /// # Arguments
    /// * `data` - The voxel data as a tensor
    /// * `origin` - Physical coordinate of the first voxel
    /// * `spacing` - Physical distance between voxels along each axis
    /// * `direction` - Orientation matrix of the image axes
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<B, D> {
        self.data
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    pub fn shape(&self) -> [usize; D] {
        self.data.dims()
    }

    /// Replace the voxel data, keeping the physical metadata.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::new(data, self.origin, self.spacing, self.direction)
    }

    /// Convert a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        let mut scaled = Vector::<D>::zeros();
        for i in 0..D {
            scaled[i] = index[i] * self.spacing[i];
        }
        self.origin + self.direction * scaled
    }

    /// Convert a physical point to a continuous index.
    ///
    /// Returns `None` when the direction matrix is singular.
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Option<Point<D>> {
        let rotated = self.direction.try_inverse()? * (*point - self.origin);
        let mut index = Point::<D>::origin();
        for i in 0..D {
            index[i] = rotated[i] / self.spacing[i];
        }
        Some(index)
    }
}

impl<B: Backend> Image<B, 3> {
    /// Build an image from a host voxel buffer laid out as in [`ImageGeometry`].
    pub fn from_voxels(
        voxels: Vec<f32>,
        geometry: &ImageGeometry,
        device: &B::Device,
    ) -> Result<Self> {
        if voxels.len() != geometry.voxel_count() {
            return Err(TransformError::tensor_data(format!(
                "expected {} voxels, got {}",
                geometry.voxel_count(),
                voxels.len()
            )));
        }
        let data = Tensor::<B, 3>::from_data(TensorData::new(voxels, geometry.dims()), device);
        Ok(Self::new(data, *geometry.origin(), *geometry.spacing(), *geometry.direction()))
    }

    /// Geometry of the voxel grid.
    pub fn geometry(&self) -> Result<ImageGeometry> {
        ImageGeometry::new(self.shape(), self.origin, self.spacing, self.direction)
    }

    /// Copy the voxels to the host.
    pub fn to_voxels(&self) -> Result<Vec<f32>> {
        self.data
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TransformError::tensor_data(format!("{:?}", e)))
    }

    /// Host snapshot of the voxels together with their geometry.
    pub fn to_volume(&self) -> Result<Volume> {
        Volume::new(self.geometry()?, self.to_voxels()?)
    }

    /// Upload a host snapshot to the given device.
    pub fn from_volume(volume: &Volume, device: &B::Device) -> Result<Self> {
        Self::from_voxels(volume.data().to_vec(), volume.geometry(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use crate::spatial::{Direction3, Point3, Spacing3};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_image_creation() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::zeros([10, 8, 6], &device);
        let origin = Point3::new([1.0, 2.0, 3.0]);
        let spacing = Spacing3::new([1.0, 1.5, 2.0]);
        let image = Image::new(data, origin, spacing, Direction3::identity());

        assert_eq!(image.shape(), [10, 8, 6]);
        assert_eq!(image.origin(), &origin);
        assert_eq!(image.spacing(), &spacing);
        assert_eq!(image.geometry().unwrap().voxel_count(), 480);
    }

    #[test]
    fn test_index_physical_roundtrip() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::zeros([10, 10, 10], &device);
        let image = Image::new(
            data,
            Point3::new([-5.0, 0.0, 2.0]),
            Spacing3::new([0.5, 1.0, 2.0]),
            Direction3::identity(),
        );

        let original = Point3::new([3.5, 4.5, 5.5]);
        let index = image.transform_physical_point_to_continuous_index(&original).unwrap();
        assert!((index[0] - 17.0).abs() < 1e-9);
        let back = image.transform_continuous_index_to_physical_point(&index);
        assert!(back.distance(&original) < 1e-9);
    }

    #[test]
    fn test_voxel_layout_matches_geometry() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([2, 3, 4]).unwrap();
        let voxels: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let image = Image::<TestBackend, 3>::from_voxels(voxels.clone(), &geometry, &device).unwrap();

        let volume = image.to_volume().unwrap();
        assert_eq!(volume.data(), voxels.as_slice());
        assert_eq!(volume.get(1, 2, 3), 23.0);
        assert_eq!(volume.get(0, 1, 0), 4.0);
    }

    #[test]
    fn test_from_voxels_rejects_wrong_length() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([2, 2, 2]).unwrap();
        let result = Image::<TestBackend, 3>::from_voxels(vec![0.0; 7], &geometry, &device);
        assert!(matches!(result, Err(TransformError::TensorData(_))));
    }
}
