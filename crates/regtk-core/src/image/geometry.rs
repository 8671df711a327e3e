//! Image geometry: grid dimensions plus the physical frame of the grid.
//!
//! Voxel buffers are laid out row-major over `[nx, ny, nz]`, so the last axis
//! varies fastest. This matches the element order of a rank-3 burn tensor with
//! shape `[nx, ny, nz]`.

use nalgebra::{Matrix3, Matrix4};
use serde::{Deserialize, Serialize};
use crate::error::{Result, TransformError};
use crate::spatial::{Direction3, Point3, Spacing3, Vector3};

/// Dimensions and physical frame of a 3D grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    dims: [usize; 3],
    origin: Point3,
    spacing: Spacing3,
    direction: Direction3,
    inverse_direction: Direction3,
}

impl ImageGeometry {
    /// Create a geometry.
    ///
    /// # Arguments
    /// * `dims` - Number of voxels along each axis, all non-zero
    /// * `origin` - World position of voxel `(0, 0, 0)`
    /// * `spacing` - Voxel size along each axis, all positive
    /// * `direction` - Invertible orientation matrix
    pub fn new(
        dims: [usize; 3],
        origin: Point3,
        spacing: Spacing3,
        direction: Direction3,
    ) -> Result<Self> {
        if dims.iter().any(|&n| n == 0) {
            return Err(TransformError::invalid_geometry(format!(
                "dimensions must be non-zero, got {:?}",
                dims
            )));
        }
        if (0..3).any(|i| !(spacing[i] > 0.0) || !spacing[i].is_finite()) {
            return Err(TransformError::invalid_geometry(format!(
                "spacing must be positive, got {:?}",
                spacing.to_array()
            )));
        }
        let inverse_direction = direction.try_inverse().ok_or_else(|| {
            TransformError::invalid_geometry("direction matrix is singular")
        })?;

        Ok(Self {
            dims,
            origin,
            spacing,
            direction,
            inverse_direction,
        })
    }

    /// Unit-spaced, axis-aligned grid anchored at the world origin.
    pub fn with_dims(dims: [usize; 3]) -> Result<Self> {
        Self::new(dims, Point3::origin(), Spacing3::uniform(1.0), Direction3::identity())
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn origin(&self) -> &Point3 {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing3 {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction3 {
        &self.direction
    }

    pub fn inverse_direction(&self) -> &Direction3 {
        &self.inverse_direction
    }

    /// Total number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Linear buffer offset of voxel `(i, j, k)`.
    #[inline]
    pub fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    /// Grid index of a linear buffer offset.
    #[inline]
    pub fn grid_index(&self, offset: usize) -> [usize; 3] {
        let k = offset % self.dims[2];
        let rest = offset / self.dims[2];
        [rest / self.dims[1], rest % self.dims[1], k]
    }

    /// World position of a continuous index: `origin + D * (S * index)`.
    pub fn index_to_world(&self, index: &Point3) -> Point3 {
        let scaled = Vector3::new(std::array::from_fn(|a| index[a] * self.spacing[a]));
        self.origin + self.direction * scaled
    }

    /// Continuous index of a world position: `S^-1 * D^-1 * (point - origin)`.
    pub fn world_to_index(&self, point: &Point3) -> Point3 {
        let rotated = self.inverse_direction * (*point - self.origin);
        Point3::new(std::array::from_fn(|a| rotated[a] / self.spacing[a]))
    }

    /// World position of the centre of voxel at linear offset `offset`.
    pub fn voxel_to_world(&self, offset: usize) -> Point3 {
        let [i, j, k] = self.grid_index(offset);
        self.index_to_world(&Point3::new([i as f64, j as f64, k as f64]))
    }

    /// Whether a continuous index lies inside the sampled extent of the grid.
    pub fn contains_index(&self, index: &Point3) -> bool {
        const TOLERANCE: f64 = 1e-6;
        (0..3).all(|a| index[a] >= -TOLERANCE && index[a] <= (self.dims[a] - 1) as f64 + TOLERANCE)
    }

    /// Homogeneous matrix mapping continuous indices to world positions.
    pub fn index_to_world_matrix(&self) -> Matrix4<f64> {
        let linear = self.direction.inner() * Matrix3::from_diagonal(self.spacing.inner());
        let mut m = linear.to_homogeneous();
        for a in 0..3 {
            m[(a, 3)] = self.origin[a];
        }
        m
    }

    /// Homogeneous matrix mapping world positions to continuous indices.
    pub fn world_to_index_matrix(&self) -> Matrix4<f64> {
        let inv_spacing = Vector3::new(std::array::from_fn(|a| 1.0 / self.spacing[a]));
        let linear = Matrix3::from_diagonal(inv_spacing.inner()) * self.inverse_direction.inner();
        let translation = -(linear * self.origin.coords().0);
        let mut m = linear.to_homogeneous();
        for a in 0..3 {
            m[(a, 3)] = translation[a];
        }
        m
    }

    /// Geometry after keeping every `factors[a]`-th voxel along each axis.
    ///
    /// The first voxel keeps its world position.
    pub fn shrink(&self, factors: [usize; 3]) -> Result<Self> {
        if factors.iter().any(|&f| f == 0) {
            return Err(TransformError::invalid_geometry("shrink factors must be >= 1"));
        }
        let dims = std::array::from_fn(|a| (self.dims[a] + factors[a] - 1) / factors[a]);
        Self::new(dims, self.origin, self.spacing.scaled(factors), self.direction)
    }

    /// Whether two geometries describe the same grid.
    pub fn same_grid(&self, other: &Self) -> bool {
        const TOLERANCE: f64 = 1e-9;
        self.dims == other.dims
            && self.origin.distance(&other.origin) < TOLERANCE
            && (self.spacing - other.spacing).norm() < TOLERANCE
            && (self.direction.inner() - other.direction.inner()).abs().max() < TOLERANCE
    }
}
