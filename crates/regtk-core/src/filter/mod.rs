//! Image filters used to build resolution levels.

pub mod gaussian;
pub mod downsample;
pub mod gradient;

pub use gaussian::GaussianFilter;
pub use downsample::DownsampleFilter;
pub use gradient::GradientFilter;
