//! Multi-level composite transformation.

use nalgebra::Matrix3;
use rayon::prelude::*;
use crate::error::{Result, TransformError};
use crate::spatial::{Point3, Vector, Vector3};
use super::trait_::{check_gradient_len, Transform};
use super::{DofStatus, Transformation};

/// Ordered chain of transformations, each applied to the output of the previous.
///
/// `T(p) = T_n(…T_2(T_1(p)))`. The DOF vector is the concatenation of the
/// children's DOF vectors in chain order.
#[derive(Debug, Clone, Default)]
pub struct MultiLevelTransform {
    levels: Vec<Transformation>,
}

impl MultiLevelTransform {
    pub fn new(levels: Vec<Transformation>) -> Self {
        Self { levels }
    }

    /// Append a transformation at the end of the chain.
    pub fn push(&mut self, transformation: Transformation) {
        self.levels.push(transformation);
    }

    pub fn levels(&self) -> &[Transformation] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [Transformation] {
        &mut self.levels
    }

    pub fn number_of_levels(&self) -> usize {
        self.levels.len()
    }

    /// Child holding global DOF `index`, and the index within that child.
    fn locate(&self, index: usize) -> Result<(usize, usize)> {
        let mut offset = index;
        for (level, t) in self.levels.iter().enumerate() {
            let n = t.number_of_dofs();
            if offset < n {
                return Ok((level, offset));
            }
            offset -= n;
        }
        Err(TransformError::dof_index(index, self.number_of_dofs()))
    }

    /// Points entering each level: `chain[k]` is the input of level `k`,
    /// `chain[n]` the final output.
    fn chain(&self, point: &Point3) -> Vec<Point3> {
        let mut points = Vec::with_capacity(self.levels.len() + 1);
        points.push(*point);
        for t in &self.levels {
            let next = t.transform_point(&points[points.len() - 1]);
            points.push(next);
        }
        points
    }
}

impl Transform for MultiLevelTransform {
    fn transform_point(&self, point: &Point3) -> Point3 {
        self.levels.iter().fold(*point, |p, t| t.transform_point(&p))
    }

    /// `J_n(p_{n-1}) · … · J_1(p_0)`.
    fn jacobian(&self, point: &Point3) -> Matrix3<f64> {
        let mut p = *point;
        let mut jacobian = Matrix3::<f64>::identity();
        for t in &self.levels {
            jacobian = t.jacobian(&p) * jacobian;
            p = t.transform_point(&p);
        }
        jacobian
    }

    fn number_of_dofs(&self) -> usize {
        self.levels.iter().map(|t| t.number_of_dofs()).sum()
    }

    fn dof(&self, index: usize) -> Result<f64> {
        let (level, local) = self.locate(index)?;
        self.levels[level].dof(local)
    }

    fn put_dof(&mut self, index: usize, value: f64) -> Result<()> {
        let (level, local) = self.locate(index)?;
        self.levels[level].put_dof(local, value)
    }

    fn status(&self, index: usize) -> Result<DofStatus> {
        let (level, local) = self.locate(index)?;
        self.levels[level].status(local)
    }

    fn put_status(&mut self, index: usize, status: DofStatus) -> Result<()> {
        let (level, local) = self.locate(index)?;
        self.levels[level].put_status(local, status)
    }

    /// `∂T/∂θ = J_after(p_k) · ∂T_k/∂θ(p_{k-1})` for a DOF of level `k`.
    fn dof_derivative(&self, index: usize, point: &Point3) -> Result<Vector3> {
        let (level, local) = self.locate(index)?;
        let points = self.chain(point);
        let local_derivative = self.levels[level].dof_derivative(local, &points[level])?;

        let mut after = Matrix3::<f64>::identity();
        for k in level + 1..self.levels.len() {
            after = self.levels[k].jacobian(&points[k]) * after;
        }
        Ok(Vector(after * local_derivative.0))
    }

    /// Pulls each sample gradient back through the Jacobians of the later
    /// levels, then lets every level chain it into its own DOFs.
    fn parameter_gradient(&self, samples: &[(Point3, Vector3)], gradient: &mut [f64]) -> Result<()> {
        check_gradient_len(gradient, self.number_of_dofs())?;
        let levels = self.levels.len();

        // pulled[s][k]: sample s as seen by level k
        let pulled: Vec<Vec<(Point3, Vector3)>> = samples
            .par_iter()
            .map(|(point, g)| {
                let points = self.chain(point);
                let mut per_level = vec![(Point3::origin(), Vector3::zeros()); levels];
                let mut back = g.0;
                for k in (0..levels).rev() {
                    per_level[k] = (points[k], Vector(back));
                    back = self.levels[k].jacobian(&points[k]).transpose() * back;
                }
                per_level
            })
            .collect();

        let mut offset = 0;
        for (k, t) in self.levels.iter().enumerate() {
            let n = t.number_of_dofs();
            let level_samples: Vec<(Point3, Vector3)> = pulled.iter().map(|s| s[k]).collect();
            t.parameter_gradient(&level_samples, &mut gradient[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }
}
