use burn::tensor::backend::Backend;
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Shape, Tensor};
use crate::image::Image;
use crate::spatial::Spacing;

/// Gaussian smoothing filter.
///
/// Separable 1D convolutions with sigmas given in physical units. The result
/// is a normalized convolution: each output voxel is divided by the kernel
/// mass that fell on valid voxels, so borders are not darkened and voxels at
/// or below the padding value neither contribute nor change.
pub struct GaussianFilter<B: Backend> {
    sigmas: Vec<f64>,
    max_kernel_width: usize,
    padding: Option<f32>,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> GaussianFilter<B> {
    /// Create a new Gaussian filter.
    ///
    /// # Arguments
    /// * `sigmas` - Standard deviation per axis in mm; a single value applies to all axes
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            max_kernel_width: 33,
            padding: None,
            _b: std::marker::PhantomData,
        }
    }

    /// Set the maximum kernel width (radius * 2 + 1).
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width.max(1);
        self
    }

    /// Exclude voxels at or below `padding` from the smoothing.
    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        image.with_data(self.apply_tensor(image.data().clone(), image.spacing()))
    }

    /// Apply the filter to a tensor directly.
    ///
    /// # Arguments
    /// * `input` - Input tensor
    /// * `spacing` - Physical spacing of the data, used to size the kernels
    pub fn apply_tensor<const D: usize>(&self, input: Tensor<B, D>, spacing: &Spacing<D>) -> Tensor<B, D> {
        if self.sigmas.iter().all(|&s| s <= 1e-6) {
            return input;
        }
        let device = input.device();

        let valid = match self.padding {
            Some(padding) => input.clone().greater_elem(padding).float(),
            None => input.ones_like(),
        };
        let mut numerator = input.clone() * valid.clone();
        let mut denominator = valid;

        for d in 0..D {
            let sigma = self.sigmas.get(d).copied().unwrap_or(self.sigmas[0]);
            if sigma <= 1e-6 {
                continue;
            }

            let pixel_sigma = sigma / spacing[d];
            let radius = (3.0 * pixel_sigma).ceil() as usize;
            let width = (2 * radius + 1).min(self.max_kernel_width | 1);
            let kernel = generate_kernel(pixel_sigma, (width - 1) / 2);
            let kernel = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);

            numerator = convolve_1d(numerator, kernel.clone(), d);
            denominator = convolve_1d(denominator, kernel, d);
        }

        let smoothed = numerator.div(denominator.clamp_min(1e-12));
        match self.padding {
            Some(padding) => {
                let padded = input.clone().lower_equal_elem(padding);
                smoothed.mask_where(padded, input)
            }
            None => smoothed,
        }
    }
}

fn generate_kernel(sigma: f64, radius: usize) -> Vec<f32> {
    let two_sigma2 = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}

/// Convolve along `dim` with zero padding, preserving the shape.
fn convolve_1d<B: Backend, const D: usize>(input: Tensor<B, D>, kernel: Tensor<B, 1>, dim: usize) -> Tensor<B, D> {
    let dims: [usize; D] = input.dims();

    // Move `dim` last and fold the other axes into the batch.
    let mut permutation = [0isize; D];
    let mut next = 0;
    for i in (0..D).filter(|&i| i != dim) {
        permutation[next] = i as isize;
        next += 1;
    }
    permutation[D - 1] = dim as isize;

    let length = dims[dim];
    let batch: usize = (0..D).filter(|&i| i != dim).map(|i| dims[i]).product();
    let reshaped = input.permute(permutation).reshape([batch, 1, length]);

    let kernel_size = kernel.dims()[0];
    let kernel = kernel.reshape([1, 1, kernel_size]);
    let options = ConvOptions::new([1], [kernel_size / 2], [1], 1);
    let output = conv1d(reshaped, kernel, None, options);

    let permuted_shape: [usize; D] = std::array::from_fn(|i| dims[permutation[i] as usize]);
    let mut inverse = [0isize; D];
    for (position, &axis) in permutation.iter().enumerate() {
        inverse[axis as usize] = position as isize;
    }
    output.reshape(Shape::new(permuted_shape)).permute(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use crate::image::ImageGeometry;

    type TestBackend = NdArray<f32>;

    fn to_vec(tensor: Tensor<TestBackend, 3>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_constant_image_is_unchanged() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([6, 5, 4]).unwrap();
        let image = Image::<TestBackend, 3>::from_voxels(vec![3.0; 120], &geometry, &device).unwrap();

        let smoothed = GaussianFilter::new(vec![1.5]).apply(&image);
        for v in to_vec(smoothed.into_data()) {
            assert!((v - 3.0).abs() < 1e-4, "border voxel drifted to {}", v);
        }
    }

    #[test]
    fn test_impulse_spreads_and_preserves_mass() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([13, 13, 13]).unwrap();
        let mut voxels = vec![0.0; geometry.voxel_count()];
        voxels[geometry.linear_index(6, 6, 6)] = 1.0;
        let image = Image::<TestBackend, 3>::from_voxels(voxels, &geometry, &device).unwrap();

        let smoothed = to_vec(GaussianFilter::new(vec![1.0]).apply(&image).into_data());
        let centre = smoothed[geometry.linear_index(6, 6, 6)];
        let neighbour = smoothed[geometry.linear_index(7, 6, 6)];
        assert!(centre < 1.0 && neighbour > 0.0 && centre > neighbour);
        let total: f32 = smoothed.iter().sum();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_padding_is_excluded() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([8, 1, 1]).unwrap();
        let voxels = vec![10.0, 10.0, 10.0, 10.0, -1.0, -1.0, -1.0, -1.0];
        let image = Image::<TestBackend, 3>::from_voxels(voxels, &geometry, &device).unwrap();

        let smoothed = to_vec(
            GaussianFilter::new(vec![2.0, 0.0, 0.0])
                .with_padding(0.0)
                .apply(&image)
                .into_data(),
        );
        for v in &smoothed[..4] {
            assert!((v - 10.0).abs() < 1e-4);
        }
        for v in &smoothed[4..] {
            assert_eq!(*v, -1.0);
        }
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let device = Default::default();
        let geometry = ImageGeometry::with_dims([3, 3, 3]).unwrap();
        let voxels: Vec<f32> = (0..27).map(|v| v as f32).collect();
        let image = Image::<TestBackend, 3>::from_voxels(voxels.clone(), &geometry, &device).unwrap();
        let smoothed = to_vec(GaussianFilter::new(vec![0.0]).apply(&image).into_data());
        assert_eq!(smoothed, voxels);
    }
}
