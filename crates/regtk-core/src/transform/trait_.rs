//! Transform trait for parametric spatial mappings.
//!
//! This module defines the core Transform trait that every transformation
//! variant implements so the optimizer can drive its parameters.

use nalgebra::Matrix3;
use rayon::prelude::*;
use crate::error::{Result, TransformError};
use crate::spatial::{Point3, Vector3};
use super::DofStatus;

/// Parametric mapping of world points.
///
/// A transformation owns a fixed-length vector of degrees of freedom (DOFs),
/// each with an [`DofStatus`]. Changing a status never changes the length.
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// Map a world point.
    fn transform_point(&self, point: &Point3) -> Point3;

    /// Spatial Jacobian `∂T(p)/∂p` at a world point.
    fn jacobian(&self, point: &Point3) -> Matrix3<f64>;

    fn number_of_dofs(&self) -> usize;

    /// Value of DOF `index`.
    fn dof(&self, index: usize) -> Result<f64>;

    /// Set DOF `index`, refreshing any cached state.
    fn put_dof(&mut self, index: usize, value: f64) -> Result<()>;

    fn status(&self, index: usize) -> Result<DofStatus>;

    fn put_status(&mut self, index: usize, status: DofStatus) -> Result<()>;

    /// Derivative of the mapped point with respect to DOF `index`,
    /// `∂T(p)/∂θ_index`.
    fn dof_derivative(&self, index: usize, point: &Point3) -> Result<Vector3>;

    /// Chain per-point world-space gradients into a per-DOF gradient.
    ///
    /// For each `(p, g)` in `samples`, adds `g · ∂T(p)/∂θ_i` to `gradient[i]`
    /// for every active DOF `i`. Passive DOFs are left untouched.
    ///
    /// # Arguments
    /// * `samples` - Points where the similarity gradient `g` is known
    /// * `gradient` - Output of length `number_of_dofs()`, accumulated into
    fn parameter_gradient(&self, samples: &[(Point3, Vector3)], gradient: &mut [f64]) -> Result<()> {
        let n = self.number_of_dofs();
        check_gradient_len(gradient, n)?;
        let active: Vec<usize> = (0..n)
            .filter(|&i| matches!(self.status(i), Ok(DofStatus::Active)))
            .collect();

        let partial = samples
            .par_iter()
            .try_fold(
                || vec![0.0; n],
                |mut acc, (point, g)| -> Result<Vec<f64>> {
                    for &i in &active {
                        acc[i] += self.dof_derivative(i, point)?.dot(g);
                    }
                    Ok(acc)
                },
            )
            .try_reduce(|| vec![0.0; n], |a, b| Ok(add_partials(a, b)))?;

        for (out, value) in gradient.iter_mut().zip(partial) {
            *out += value;
        }
        Ok(())
    }

    /// Copy of the DOF vector.
    fn dofs(&self) -> Vec<f64> {
        (0..self.number_of_dofs()).filter_map(|i| self.dof(i).ok()).collect()
    }

    /// Replace the DOF vector. Its length must match `number_of_dofs()`.
    fn set_dofs(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.number_of_dofs() {
            return Err(TransformError::dof_count(self.number_of_dofs(), values.len()));
        }
        for (i, &v) in values.iter().enumerate() {
            self.put_dof(i, v)?;
        }
        Ok(())
    }

    /// Number of DOFs currently active.
    fn number_of_active_dofs(&self) -> usize {
        (0..self.number_of_dofs())
            .filter(|&i| matches!(self.status(i), Ok(DofStatus::Active)))
            .count()
    }
}

pub(crate) fn check_gradient_len(gradient: &[f64], n: usize) -> Result<()> {
    if gradient.len() != n {
        return Err(TransformError::dof_count(n, gradient.len()));
    }
    Ok(())
}

pub(crate) fn add_partials(mut a: Vec<f64>, b: Vec<f64>) -> Vec<f64> {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}
