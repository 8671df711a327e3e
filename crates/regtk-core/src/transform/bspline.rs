//! Cubic B-spline free-form deformation.
//!
//! A regular lattice of control points carries world-space displacements.
//! The mapped point is `T(p) = p + Σ φ_ijk(u(p)) c_ijk`, where `u(p)` is the
//! continuous lattice index of `p` and `φ_ijk` the tensor-product cubic
//! B-spline centred on control point `(i, j, k)`. Control points outside the
//! lattice contribute nothing.
//!
//! DOFs are ordered as all x displacements, then all y, then all z. Within a
//! block, control points follow the linear order of the lattice geometry.

use nalgebra::Matrix3;
use rayon::prelude::*;
use crate::error::{Result, TransformError};
use crate::image::ImageGeometry;
use crate::spatial::{Point3, Spacing3, Vector3};
use super::trait_::{add_partials, check_gradient_len, Transform};
use super::DofStatus;

/// Cubic B-spline basis functions at `t` in `[0, 1)`.
#[inline]
pub fn basis(t: f64) -> [f64; 4] {
    let s = 1.0 - t;
    [
        s * s * s / 6.0,
        (3.0 * t * t * t - 6.0 * t * t + 4.0) / 6.0,
        (-3.0 * t * t * t + 3.0 * t * t + 3.0 * t + 1.0) / 6.0,
        t * t * t / 6.0,
    ]
}

/// First derivatives of the cubic B-spline basis functions.
#[inline]
pub fn basis_derivative(t: f64) -> [f64; 4] {
    let s = 1.0 - t;
    [
        -0.5 * s * s,
        1.5 * t * t - 2.0 * t,
        -1.5 * t * t + t + 0.5,
        0.5 * t * t,
    ]
}

/// Lattice cell containing a point: first supporting control point per axis
/// and the basis values along each axis.
struct Support {
    first: [isize; 3],
    weights: [[f64; 4]; 3],
    derivatives: [[f64; 4]; 3],
}

/// Cubic B-spline FFD over a control point lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct BSplineFfd {
    lattice: ImageGeometry,
    parameters: Vec<f64>,
    status: Vec<DofStatus>,
}

impl BSplineFfd {
    /// DOF count of a lattice with `dims` control points, three per point.
    ///
    /// # Errors
    /// `InvalidLattice` when the count does not fit in `usize`
    pub fn dofs_for(dims: [usize; 3]) -> Result<usize> {
        dims.iter()
            .try_fold(3usize, |n, &d| n.checked_mul(d))
            .ok_or_else(|| TransformError::invalid_lattice(format!("lattice {:?} is too large", dims)))
    }

    /// Zero-displacement FFD on the given lattice.
    pub fn new(lattice: ImageGeometry) -> Self {
        let n = 3 * lattice.voxel_count();
        Self {
            lattice,
            parameters: vec![0.0; n],
            status: vec![DofStatus::Active; n],
        }
    }

    /// Lattice covering an image domain with the given control point spacing.
    ///
    /// The lattice shares the domain orientation and extends one control point
    /// past the domain on every side.
    ///
    /// # Arguments
    /// * `domain` - Geometry of the image the deformation is defined on
    /// * `control_spacing` - Distance between control points in mm per axis
    pub fn from_domain(domain: &ImageGeometry, control_spacing: [f64; 3]) -> Result<Self> {
        if control_spacing.iter().any(|&s| !(s > 0.0)) {
            return Err(TransformError::invalid_lattice(format!(
                "control point spacing must be positive, got {:?}",
                control_spacing
            )));
        }
        let domain_dims = domain.dims();
        let dims = std::array::from_fn(|a| {
            let extent = (domain_dims[a] - 1) as f64 * domain.spacing()[a];
            (extent / control_spacing[a]).ceil() as usize + 3
        });
        let margin = Vector3::new(control_spacing.map(|s| -s));
        let origin = *domain.origin() + *domain.direction() * margin;
        let lattice = ImageGeometry::new(dims, origin, Spacing3::new(control_spacing), *domain.direction())?;
        Ok(Self::new(lattice))
    }

    pub fn lattice(&self) -> &ImageGeometry {
        &self.lattice
    }

    pub fn number_of_control_points(&self) -> usize {
        self.lattice.voxel_count()
    }

    /// Displacement stored at control point `(i, j, k)`.
    pub fn control_point(&self, i: usize, j: usize, k: usize) -> Vector3 {
        let n = self.number_of_control_points();
        let cp = self.lattice.linear_index(i, j, k);
        Vector3::new([self.parameters[cp], self.parameters[n + cp], self.parameters[2 * n + cp]])
    }

    pub fn put_control_point(&mut self, i: usize, j: usize, k: usize, displacement: Vector3) {
        let n = self.number_of_control_points();
        let cp = self.lattice.linear_index(i, j, k);
        for axis in 0..3 {
            self.parameters[axis * n + cp] = displacement[axis];
        }
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Replace all DOFs and statuses at once, as when reading a file.
    pub fn with_parameters(mut self, parameters: Vec<f64>, status: Vec<DofStatus>) -> Result<Self> {
        let n = self.parameters.len();
        if parameters.len() != n || status.len() != n {
            return Err(TransformError::dof_count(n, parameters.len().min(status.len())));
        }
        self.parameters = parameters;
        self.status = status;
        Ok(self)
    }

    fn support(&self, point: &Point3) -> Support {
        let u = self.lattice.world_to_index(point);
        let mut first = [0isize; 3];
        let mut weights = [[0.0; 4]; 3];
        let mut derivatives = [[0.0; 4]; 3];
        for a in 0..3 {
            let base = u[a].floor();
            let t = u[a] - base;
            first[a] = base as isize - 1;
            weights[a] = basis(t);
            derivatives[a] = basis_derivative(t);
        }
        Support {
            first,
            weights,
            derivatives,
        }
    }

    /// Visit every in-lattice control point supporting `point`, with its
    /// linear index and the offsets `(l, m, n)` into the support.
    fn for_each_support<F: FnMut(usize, [usize; 3])>(&self, support: &Support, mut f: F) {
        let dims = self.lattice.dims();
        let inside = |a: usize, offset: usize| {
            let index = support.first[a] + offset as isize;
            (index >= 0 && index < dims[a] as isize).then_some(index as usize)
        };
        for l in 0..4 {
            let Some(i) = inside(0, l) else { continue };
            for m in 0..4 {
                let Some(j) = inside(1, m) else { continue };
                for n in 0..4 {
                    let Some(k) = inside(2, n) else { continue };
                    f(self.lattice.linear_index(i, j, k), [l, m, n]);
                }
            }
        }
    }

    /// World-space displacement at `point`.
    pub fn displacement(&self, point: &Point3) -> Vector3 {
        let n = self.number_of_control_points();
        let support = self.support(point);
        let mut d = Vector3::zeros();
        self.for_each_support(&support, |cp, [l, m, o]| {
            let w = support.weights[0][l] * support.weights[1][m] * support.weights[2][o];
            for axis in 0..3 {
                d[axis] += w * self.parameters[axis * n + cp];
            }
        });
        d
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.parameters.len() {
            return Err(TransformError::dof_index(index, self.parameters.len()));
        }
        Ok(())
    }
}

impl Transform for BSplineFfd {
    fn transform_point(&self, point: &Point3) -> Point3 {
        *point + self.displacement(point)
    }

    fn jacobian(&self, point: &Point3) -> Matrix3<f64> {
        let n = self.number_of_control_points();
        let support = self.support(point);
        let (w, dw) = (&support.weights, &support.derivatives);

        // Σ c ⊗ ∂φ/∂u, then chain through ∂u/∂p = S^-1 D^-1.
        let mut du = Matrix3::<f64>::zeros();
        self.for_each_support(&support, |cp, [l, m, o]| {
            let grad = [
                dw[0][l] * w[1][m] * w[2][o],
                w[0][l] * dw[1][m] * w[2][o],
                w[0][l] * w[1][m] * dw[2][o],
            ];
            for r in 0..3 {
                let c = self.parameters[r * n + cp];
                for s in 0..3 {
                    du[(r, s)] += c * grad[s];
                }
            }
        });

        let spacing = self.lattice.spacing();
        let inv_spacing = nalgebra::Vector3::new(1.0 / spacing[0], 1.0 / spacing[1], 1.0 / spacing[2]);
        let du_dp = Matrix3::from_diagonal(&inv_spacing) * self.lattice.inverse_direction().inner();
        Matrix3::identity() + du * du_dp
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
        let n = self.number_of_control_points();
        let (axis, cp) = (index / n, index % n);
        let target = self.lattice.grid_index(cp);
        let support = self.support(point);

        let mut weight = 1.0;
        for a in 0..3 {
            let offset = target[a] as isize - support.first[a];
            if !(0..4).contains(&offset) {
                return Ok(Vector3::zeros());
            }
            weight *= support.weights[a][offset as usize];
        }
        let mut derivative = Vector3::zeros();
        derivative[axis] = weight;
        Ok(derivative)
    }

    /// Scatters each sample gradient into the 4x4x4 control points that
    /// support it.
    fn parameter_gradient(&self, samples: &[(Point3, Vector3)], gradient: &mut [f64]) -> Result<()> {
        let total = self.parameters.len();
        check_gradient_len(gradient, total)?;
        let n = self.number_of_control_points();

        let partial = samples
            .par_iter()
            .fold(
                || vec![0.0; total],
                |mut acc, (point, g)| {
                    let support = self.support(point);
                    self.for_each_support(&support, |cp, [l, m, o]| {
                        let w = support.weights[0][l] * support.weights[1][m] * support.weights[2][o];
                        for axis in 0..3 {
                            acc[axis * n + cp] += w * g[axis];
                        }
                    });
                    acc
                },
            )
            .reduce(|| vec![0.0; total], add_partials);

        for (i, value) in partial.into_iter().enumerate() {
            if self.status[i] == DofStatus::Active {
                gradient[i] += value;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Direction3;

    fn lattice() -> ImageGeometry {
        ImageGeometry::new(
            [5, 6, 4],
            Point3::new([-10.0, -12.0, -5.0]),
            Spacing3::new([5.0, 4.0, 5.0]),
            Direction3::identity(),
        )
        .unwrap()
    }

    fn deformed() -> BSplineFfd {
        let mut ffd = BSplineFfd::new(lattice());
        for index in 0..ffd.number_of_dofs() {
            let value = ((index * 7919) % 23) as f64 / 10.0 - 1.1;
            ffd.put_dof(index, value).unwrap();
        }
        ffd
    }

    #[test]
    fn test_basis_partition_of_unity() {
        for t in [0.0, 0.2, 0.5, 0.99] {
            let b = basis(t);
            assert!((b.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(basis_derivative(t).iter().sum::<f64>().abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_displacement_is_identity() {
        let ffd = BSplineFfd::new(lattice());
        let p = Point3::new([1.0, 2.0, 3.0]);
        assert_eq!(ffd.transform_point(&p), p);
        assert!((ffd.jacobian(&p) - Matrix3::identity()).abs().max() < 1e-12);
        assert_eq!(ffd.number_of_dofs(), 3 * 120);
    }

    #[test]
    fn test_uniform_displacement_translates_interior() {
        let mut ffd = BSplineFfd::new(lattice());
        let shift = Vector3::new([1.5, -2.0, 0.25]);
        let [nx, ny, nz] = ffd.lattice().dims();
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    ffd.put_control_point(i, j, k, shift);
                }
            }
        }
        // interior point: full 4x4x4 support lies in the lattice
        let p = Point3::new([0.5, 0.0, 0.0]);
        assert!((ffd.displacement(&p) - shift).norm() < 1e-12);
        assert!((ffd.jacobian(&p) - Matrix3::identity()).abs().max() < 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let ffd = deformed();
        let p = Point3::new([1.3, -0.7, 2.1]);
        let h = 1e-6;
        let analytic = ffd.jacobian(&p);
        for s in 0..3 {
            let mut plus = p;
            let mut minus = p;
            plus[s] += h;
            minus[s] -= h;
            let column = (ffd.transform_point(&plus) - ffd.transform_point(&minus)) * (0.5 / h);
            for r in 0..3 {
                assert!((analytic[(r, s)] - column[r]).abs() < 1e-6, "J[{}, {}]", r, s);
            }
        }
    }

    #[test]
    fn test_parameter_gradient_matches_dof_derivative() {
        let ffd = deformed();
        let samples = vec![
            (Point3::new([1.3, -0.7, 2.1]), Vector3::new([0.3, -1.0, 2.0])),
            (Point3::new([-3.0, 4.2, 0.4]), Vector3::new([1.0, 0.5, -0.5])),
        ];
        let mut fast = vec![0.0; ffd.number_of_dofs()];
        ffd.parameter_gradient(&samples, &mut fast).unwrap();

        for (i, value) in fast.iter().enumerate() {
            let slow: f64 = samples
                .iter()
                .map(|(p, g)| ffd.dof_derivative(i, p).unwrap().dot(g))
                .sum();
            assert!((value - slow).abs() < 1e-12, "dof {}", i);
        }
    }

    #[test]
    fn test_from_domain_covers_image() {
        let domain = ImageGeometry::new(
            [20, 10, 1],
            Point3::new([5.0, 0.0, 0.0]),
            Spacing3::new([1.0, 2.0, 1.0]),
            Direction3::identity(),
        )
        .unwrap();
        let ffd = BSplineFfd::from_domain(&domain, [5.0, 5.0, 5.0]).unwrap();
        assert_eq!(ffd.lattice().dims(), [7, 7, 3]);
        assert_eq!(ffd.lattice().origin(), &Point3::new([0.0, -5.0, -5.0]));
        assert!(BSplineFfd::from_domain(&domain, [0.0, 5.0, 5.0]).is_err());
    }
}
