pub mod error;
pub mod spatial;
pub mod image;
pub mod filter;
pub mod interpolation;
pub mod transform;

pub use error::{TransformError, Result};
pub use image::{Image, ImageGeometry, Volume};
pub use spatial::{Point, Vector, Spacing, Direction};
pub use transform::{DofStatus, Transform, Transformation};
