//! Direction matrices for image orientation.

use nalgebra::SMatrix;
use serde::{Deserialize, Serialize};
use super::Vector;

/// Orientation of the image axes in physical space.
///
/// Column `i` holds the world direction of image axis `i`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction<const D: usize>(pub SMatrix<f64, D, D>);

impl<const D: usize> Direction<D> {
    pub fn identity() -> Self {
        Self(SMatrix::identity())
    }

    pub fn from_matrix(matrix: SMatrix<f64, D, D>) -> Self {
        Self(matrix)
    }

    pub fn try_inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }

    /// Check whether the axes are orthonormal.
    pub fn is_orthogonal(&self) -> bool {
        let product = self.0 * self.0.transpose();
        (product - SMatrix::<f64, D, D>::identity()).abs().max() < 1e-6
    }

    pub fn inner(&self) -> &SMatrix<f64, D, D> {
        &self.0
    }
}

impl<const D: usize> Default for Direction<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const D: usize> std::ops::Index<(usize, usize)> for Direction<D> {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> std::ops::Mul<Vector<D>> for Direction<D> {
    type Output = Vector<D>;

    fn mul(self, vector: Vector<D>) -> Self::Output {
        Vector(self.0 * vector.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_rotation() {
        let rot = Direction::<3>::from_matrix(SMatrix::<f64, 3, 3>::new(
            0.0, -1.0, 0.0,
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        ));
        assert!(rot.is_orthogonal());
        let v = rot * Vector::new([1.0, 0.0, 0.0]);
        assert_eq!(v, Vector::new([0.0, 1.0, 0.0]));
        let inv = rot.try_inverse().unwrap();
        assert_eq!(inv * v, Vector::new([1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_direction_skew_is_not_orthogonal() {
        let mut m = SMatrix::<f64, 3, 3>::identity();
        m[(0, 1)] = 0.5;
        assert!(!Direction::<3>::from_matrix(m).is_orthogonal());
    }
}
