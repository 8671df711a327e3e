//! Homogeneous (4x4 matrix) transformations: rigid, affine and raw matrix.
//!
//! All three parameterizations act through one cached 4x4 matrix that is
//! rebuilt whenever a DOF changes.
//!
//! * Rigid, 6 DOFs: `tx ty tz` (mm), `rx ry rz` (degrees).
//!   `M = T · Rz · Ry · Rx`.
//! * Affine, 12 DOFs: the rigid DOFs, then `sx sy sz` (percent, 100 is
//!   identity) and shears `sxy syz sxz` (degrees). `M = T · Rz · Ry · Rx · H · S`.
//! * Matrix, 12 DOFs: the top three rows of the matrix, row-major.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Vector4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::error::{Result, TransformError};
use crate::spatial::{Point3, Vector3};
use super::trait_::{check_gradient_len, Transform};
use super::DofStatus;

const RIGID_NAMES: [&str; 6] = ["tx", "ty", "tz", "rx", "ry", "rz"];
const AFFINE_NAMES: [&str; 12] = ["tx", "ty", "tz", "rx", "ry", "rz", "sx", "sy", "sz", "sxy", "syz", "sxz"];
const MATRIX_NAMES: [&str; 12] = ["m00", "m01", "m02", "m03", "m10", "m11", "m12", "m13", "m20", "m21", "m22", "m23"];

/// Finite-difference step for matrix derivatives of angle and scale DOFs.
const DERIVATIVE_STEP: f64 = 1e-4;

/// Parameterization of a homogeneous transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HomogeneousKind {
    Rigid,
    Affine,
    Matrix,
}

impl HomogeneousKind {
    pub fn number_of_dofs(&self) -> usize {
        self.parameter_names().len()
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::Rigid => &RIGID_NAMES,
            Self::Affine => &AFFINE_NAMES,
            Self::Matrix => &MATRIX_NAMES,
        }
    }

    /// DOF vector of the identity mapping.
    pub fn identity_parameters(&self) -> Vec<f64> {
        match self {
            Self::Rigid => vec![0.0; 6],
            Self::Affine => {
                let mut p = vec![0.0; 12];
                p[6..9].fill(100.0);
                p
            }
            Self::Matrix => vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    /// Build the 4x4 matrix for a DOF vector of this kind.
    fn build_matrix(&self, p: &[f64]) -> Matrix4<f64> {
        match self {
            Self::Rigid => translation(p) * rotation(&p[3..6]),
            Self::Affine => {
                let shear = Matrix4::new(
                    1.0, p[9].to_radians().tan(), p[11].to_radians().tan(), 0.0,
                    0.0, 1.0, p[10].to_radians().tan(), 0.0,
                    0.0, 0.0, 1.0, 0.0,
                    0.0, 0.0, 0.0, 1.0,
                );
                let scale = Matrix4::new_nonuniform_scaling(&nalgebra::Vector3::new(
                    p[6] / 100.0,
                    p[7] / 100.0,
                    p[8] / 100.0,
                ));
                translation(p) * rotation(&p[3..6]) * shear * scale
            }
            Self::Matrix => {
                let mut m = Matrix4::<f64>::identity();
                for r in 0..3 {
                    for c in 0..4 {
                        m[(r, c)] = p[4 * r + c];
                    }
                }
                m
            }
        }
    }
}

fn translation(p: &[f64]) -> Matrix4<f64> {
    Matrix4::new_translation(&nalgebra::Vector3::new(p[0], p[1], p[2]))
}

/// `Rz · Ry · Rx` from angles in degrees.
fn rotation(angles: &[f64]) -> Matrix4<f64> {
    let rx = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::x_axis(), angles[0].to_radians());
    let ry = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::y_axis(), angles[1].to_radians());
    let rz = nalgebra::Rotation3::from_axis_angle(&nalgebra::Vector3::z_axis(), angles[2].to_radians());
    (rz * ry * rx).to_homogeneous()
}

/// Euler angles in degrees of a rotation built as `Rz · Ry · Rx`.
fn euler_angles(r: &Matrix3<f64>) -> [f64; 3] {
    let ry = (-r[(2, 0)]).clamp(-1.0, 1.0).asin();
    let (rx, rz) = if ry.cos().abs() > 1e-9 {
        (r[(2, 1)].atan2(r[(2, 2)]), r[(1, 0)].atan2(r[(0, 0)]))
    } else {
        // gimbal lock: fold the x rotation into z
        ((-r[(1, 2)]).atan2(r[(1, 1)]), 0.0)
    };
    [rx.to_degrees(), ry.to_degrees(), rz.to_degrees()]
}

/// Rigid, affine or raw-matrix transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct HomogeneousTransform {
    kind: HomogeneousKind,
    parameters: Vec<f64>,
    status: Vec<DofStatus>,
    matrix: Matrix4<f64>,
}

impl HomogeneousTransform {
    fn build(kind: HomogeneousKind, parameters: Vec<f64>) -> Self {
        Self {
            kind,
            status: vec![DofStatus::Active; parameters.len()],
            matrix: kind.build_matrix(&parameters),
            parameters,
        }
    }

    /// Identity transformation of the given kind with all DOFs active.
    pub fn identity(kind: HomogeneousKind) -> Self {
        Self::build(kind, kind.identity_parameters())
    }

    pub fn rigid() -> Self {
        Self::identity(HomogeneousKind::Rigid)
    }

    pub fn affine() -> Self {
        Self::identity(HomogeneousKind::Affine)
    }

    /// Transformation with the given DOF vector, all DOFs active.
    pub fn with_parameters(kind: HomogeneousKind, parameters: Vec<f64>) -> Result<Self> {
        if parameters.len() != kind.number_of_dofs() {
            return Err(TransformError::dof_count(kind.number_of_dofs(), parameters.len()));
        }
        Ok(Self::build(kind, parameters))
    }

    /// Raw-matrix transformation from the top three rows of `matrix`.
    pub fn from_matrix(matrix: &Matrix4<f64>) -> Self {
        let parameters = (0..3).flat_map(|r| (0..4).map(move |c| matrix[(r, c)])).collect();
        Self::build(HomogeneousKind::Matrix, parameters)
    }

    /// Rigid transformation from translation (mm) and rotation (degrees).
    pub fn rigid_from(translation: [f64; 3], angles: [f64; 3]) -> Self {
        let parameters = translation.iter().chain(angles.iter()).copied().collect();
        Self::build(HomogeneousKind::Rigid, parameters)
    }

    pub fn kind(&self) -> HomogeneousKind {
        self.kind
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.matrix
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Inverse mapping.
    ///
    /// A rigid transformation inverts to a rigid one; affine and raw-matrix
    /// transformations invert to a raw matrix. DOF statuses are reset to active.
    pub fn invert(&self) -> Result<Self> {
        let inverse = self
            .matrix
            .try_inverse()
            .ok_or_else(|| TransformError::not_invertible("homogeneous matrix is singular"))?;

        match self.kind {
            HomogeneousKind::Rigid => {
                let rotation: Matrix3<f64> = inverse.fixed_view::<3, 3>(0, 0).clone_owned();
                let angles = euler_angles(&rotation);
                Ok(Self::rigid_from([inverse[(0, 3)], inverse[(1, 3)], inverse[(2, 3)]], angles))
            }
            HomogeneousKind::Affine | HomogeneousKind::Matrix => Ok(Self::from_matrix(&inverse)),
        }
    }

    /// `∂M/∂θ_i` for every DOF.
    fn derivative_matrices(&self) -> Vec<Matrix4<f64>> {
        (0..self.parameters.len()).map(|i| self.derivative_matrix(i)).collect()
    }

    fn derivative_matrix(&self, index: usize) -> Matrix4<f64> {
        match self.kind {
            HomogeneousKind::Matrix => {
                let mut d = Matrix4::<f64>::zeros();
                d[(index / 4, index % 4)] = 1.0;
                d
            }
            HomogeneousKind::Rigid | HomogeneousKind::Affine if index < 3 => {
                let mut d = Matrix4::<f64>::zeros();
                d[(index, 3)] = 1.0;
                d
            }
            _ => {
                let mut plus = self.parameters.clone();
                let mut minus = self.parameters.clone();
                plus[index] += DERIVATIVE_STEP;
                minus[index] -= DERIVATIVE_STEP;
                (self.kind.build_matrix(&plus) - self.kind.build_matrix(&minus)) / (2.0 * DERIVATIVE_STEP)
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.parameters.len() {
            return Err(TransformError::dof_index(index, self.parameters.len()));
        }
        Ok(())
    }

    fn update_matrix(&mut self) {
        self.matrix = self.kind.build_matrix(&self.parameters);
    }
}

impl Transform for HomogeneousTransform {
    fn transform_point(&self, point: &Point3) -> Point3 {
        let h = self.matrix * Vector4::new(point[0], point[1], point[2], 1.0);
        Point3::new([h[0], h[1], h[2]])
    }

    fn jacobian(&self, _point: &Point3) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).clone_owned()
    }

    fn number_of_dofs(&self) -> usize {
        self.parameters.len()
    }

    fn dof(&self, index: usize) -> Result<f64> {
        self.check_index(index)?;
        Ok(self.parameters[index])
    }

    fn put_dof(&mut self, index: usize, value: f64) -> Result<()> {
        self.check_index(index)?;
        self.parameters[index] = value;
        self.update_matrix();
        Ok(())
    }

    fn status(&self, index: usize) -> Result<DofStatus> {
        self.check_index(index)?;
        Ok(self.status[index])
    }

    fn put_status(&mut self, index: usize, status: DofStatus) -> Result<()> {
        self.check_index(index)?;
        self.status[index] = status;
        Ok(())
    }

    fn dof_derivative(&self, index: usize, point: &Point3) -> Result<Vector3> {
        self.check_index(index)?;
        let h = self.derivative_matrix(index) * Vector4::new(point[0], point[1], point[2], 1.0);
        Ok(Vector3::new([h[0], h[1], h[2]]))
    }

    /// Since `∂T/∂θ_i = (∂M/∂θ_i) p̃`, the gradient only needs the moment
    /// `A = Σ g p̃ᵀ` over the samples, contracted with each `∂M/∂θ_i`.
    fn parameter_gradient(&self, samples: &[(Point3, Vector3)], gradient: &mut [f64]) -> Result<()> {
        check_gradient_len(gradient, self.parameters.len())?;

        let moment = samples
            .par_iter()
            .fold(Matrix3x4::<f64>::zeros, |mut acc, (p, g)| {
                let ph = nalgebra::RowVector4::new(p[0], p[1], p[2], 1.0);
                acc += g.inner() * ph;
                acc
            })
            .reduce(Matrix3x4::zeros, |a, b| a + b);

        for (i, derivative) in self.derivative_matrices().iter().enumerate() {
            if self.status[i] == DofStatus::Passive {
                continue;
            }
            let mut sum = 0.0;
            for r in 0..3 {
                for c in 0..4 {
                    sum += derivative[(r, c)] * moment[(r, c)];
                }
            }
            gradient[i] += sum;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_points_close(a: &Point3, b: &Point3, tolerance: f64) {
        assert!(a.distance(b) < tolerance, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn test_identity_maps_point_to_itself() {
        let p = Point3::new([3.0, -7.5, 12.25]);
        for kind in [HomogeneousKind::Rigid, HomogeneousKind::Affine, HomogeneousKind::Matrix] {
            let t = HomogeneousTransform::identity(kind);
            assert_points_close(&t.transform_point(&p), &p, 1e-12);
            assert_eq!(t.number_of_dofs(), kind.number_of_dofs());
        }
    }

    #[test]
    fn test_rigid_rotation_about_z() {
        let t = HomogeneousTransform::rigid_from([1.0, 2.0, 3.0], [0.0, 0.0, 90.0]);
        let q = t.transform_point(&Point3::new([1.0, 0.0, 0.0]));
        assert_points_close(&q, &Point3::new([1.0, 3.0, 3.0]), 1e-12);
    }

    #[test]
    fn test_affine_scaling_in_percent() {
        let mut t = HomogeneousTransform::affine();
        t.put_dof(6, 200.0).unwrap();
        t.put_dof(8, 50.0).unwrap();
        let q = t.transform_point(&Point3::new([1.0, 1.0, 1.0]));
        assert_points_close(&q, &Point3::new([2.0, 1.0, 0.5]), 1e-12);
        assert!((t.jacobian(&Point3::origin()).determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rigid_invert_roundtrip() {
        let t = HomogeneousTransform::rigid_from([5.0, -3.0, 2.0], [10.0, -20.0, 30.0]);
        let inverse = t.invert().unwrap();
        assert_eq!(inverse.kind(), HomogeneousKind::Rigid);

        let p = Point3::new([4.0, 1.0, -6.0]);
        assert_points_close(&inverse.transform_point(&t.transform_point(&p)), &p, 1e-9);
    }

    #[test]
    fn test_affine_invert_is_matrix() {
        let t = HomogeneousTransform::with_parameters(
            HomogeneousKind::Affine,
            vec![1.0, 2.0, 3.0, 5.0, 0.0, -5.0, 110.0, 90.0, 100.0, 3.0, 0.0, -2.0],
        )
        .unwrap();
        let inverse = t.invert().unwrap();
        assert_eq!(inverse.kind(), HomogeneousKind::Matrix);
        let p = Point3::new([1.0, 1.0, 1.0]);
        assert_points_close(&t.transform_point(&inverse.transform_point(&p)), &p, 1e-9);
    }

    #[test]
    fn test_singular_matrix_is_not_invertible() {
        let mut t = HomogeneousTransform::affine();
        t.put_dof(7, 0.0).unwrap();
        assert!(matches!(t.invert(), Err(TransformError::NotInvertible(_))));
    }

    #[test]
    fn test_dof_derivative_matches_finite_difference() {
        let t = HomogeneousTransform::with_parameters(
            HomogeneousKind::Affine,
            vec![1.0, -2.0, 0.5, 12.0, -7.0, 25.0, 95.0, 105.0, 120.0, 4.0, -3.0, 2.0],
        )
        .unwrap();
        let p = Point3::new([10.0, -4.0, 7.0]);
        let h = 1e-5;
        for i in 0..t.number_of_dofs() {
            let mut plus = t.clone();
            let mut minus = t.clone();
            plus.put_dof(i, t.dof(i).unwrap() + h).unwrap();
            minus.put_dof(i, t.dof(i).unwrap() - h).unwrap();
            let numeric = (plus.transform_point(&p) - minus.transform_point(&p)) * (0.5 / h);
            let analytic = t.dof_derivative(i, &p).unwrap();
            assert!((numeric - analytic).norm() < 1e-5, "dof {}", t.kind().parameter_names()[i]);
        }
    }

    #[test]
    fn test_parameter_gradient_skips_passive() {
        let mut t = HomogeneousTransform::rigid();
        t.put_status(0, DofStatus::Passive).unwrap();
        let samples = vec![(Point3::new([1.0, 2.0, 3.0]), Vector3::new([1.0, 1.0, 0.0]))];
        let mut gradient = vec![0.0; 6];
        t.parameter_gradient(&samples, &mut gradient).unwrap();

        assert_eq!(gradient[0], 0.0);
        assert!((gradient[1] - 1.0).abs() < 1e-12);
        assert_eq!(gradient[2], 0.0);
        assert_eq!(t.number_of_active_dofs(), 5);
    }

    #[test]
    fn test_out_of_range_dof() {
        let mut t = HomogeneousTransform::rigid();
        assert!(matches!(t.dof(6), Err(TransformError::DofIndexOutOfRange { index: 6, count: 6 })));
        assert!(t.put_status(9, DofStatus::Passive).is_err());
        assert!(HomogeneousTransform::with_parameters(HomogeneousKind::Rigid, vec![0.0; 5]).is_err());
    }
}
