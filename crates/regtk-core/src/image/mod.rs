//! Images, their geometry and host-side voxel snapshots.

pub mod image;
pub mod geometry;
pub mod volume;

pub use image::Image;
pub use geometry::ImageGeometry;
pub use volume::Volume;
