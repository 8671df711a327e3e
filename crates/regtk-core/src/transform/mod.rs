//! Parametric spatial transformations.
//!
//! Three variants share the [`Transform`] trait: homogeneous (rigid, affine,
//! raw matrix), cubic B-spline free-form deformation and a multi-level chain.
//! [`Transformation`] is the closed set the optimizer and the file format
//! work with.

pub mod trait_;
pub mod homogeneous;
pub mod bspline;
pub mod composite;
pub mod io;
pub mod legacy;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use crate::error::{Result, TransformError};
use crate::spatial::{Point3, Vector3};

pub use trait_::Transform;
pub use homogeneous::{HomogeneousKind, HomogeneousTransform};
pub use bspline::BSplineFfd;
pub use composite::MultiLevelTransform;
pub use io::{read_transformation, write_transformation, TRANSFORMATION_MAGIC};

/// Whether the optimizer may change a DOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DofStatus {
    #[default]
    Active,
    Passive,
}

impl DofStatus {
    /// Integer code used in transformation files.
    pub fn code(&self) -> i32 {
        match self {
            Self::Active => 1,
            Self::Passive => 0,
        }
    }

    /// Any non-zero code is active.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::Passive
        } else {
            Self::Active
        }
    }
}

/// Any transformation the engine can optimize and persist.
#[derive(Debug, Clone)]
pub enum Transformation {
    Homogeneous(HomogeneousTransform),
    FreeForm(BSplineFfd),
    MultiLevel(MultiLevelTransform),
}

impl Transformation {
    /// Identity rigid transformation.
    pub fn rigid() -> Self {
        Self::Homogeneous(HomogeneousTransform::rigid())
    }

    /// Identity affine transformation.
    pub fn affine() -> Self {
        Self::Homogeneous(HomogeneousTransform::affine())
    }

    /// Human-readable variant name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Homogeneous(t) => match t.kind() {
                HomogeneousKind::Rigid => "rigid",
                HomogeneousKind::Affine => "affine",
                HomogeneousKind::Matrix => "homogeneous",
            },
            Self::FreeForm(_) => "bspline-ffd",
            Self::MultiLevel(_) => "multi-level",
        }
    }

    /// Inverse of a homogeneous transformation.
    pub fn invert(&self) -> Result<Self> {
        match self {
            Self::Homogeneous(t) => Ok(Self::Homogeneous(t.invert()?)),
            other => Err(TransformError::unsupported(format!(
                "{} transformation has no closed-form inverse",
                other.name()
            ))),
        }
    }

    fn inner(&self) -> &dyn Transform {
        match self {
            Self::Homogeneous(t) => t,
            Self::FreeForm(t) => t,
            Self::MultiLevel(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Transform {
        match self {
            Self::Homogeneous(t) => t,
            Self::FreeForm(t) => t,
            Self::MultiLevel(t) => t,
        }
    }
}

impl From<HomogeneousTransform> for Transformation {
    fn from(t: HomogeneousTransform) -> Self {
        Self::Homogeneous(t)
    }
}

impl From<BSplineFfd> for Transformation {
    fn from(t: BSplineFfd) -> Self {
        Self::FreeForm(t)
    }
}

impl From<MultiLevelTransform> for Transformation {
    fn from(t: MultiLevelTransform) -> Self {
        Self::MultiLevel(t)
    }
}

impl Transform for Transformation {
    fn transform_point(&self, point: &Point3) -> Point3 {
        self.inner().transform_point(point)
    }

    fn jacobian(&self, point: &Point3) -> Matrix3<f64> {
        self.inner().jacobian(point)
    }

    fn number_of_dofs(&self) -> usize {
        self.inner().number_of_dofs()
    }

    fn dof(&self, index: usize) -> Result<f64> {
        self.inner().dof(index)
    }

    fn put_dof(&mut self, index: usize, value: f64) -> Result<()> {
        self.inner_mut().put_dof(index, value)
    }

    fn status(&self, index: usize) -> Result<DofStatus> {
        self.inner().status(index)
    }

    fn put_status(&mut self, index: usize, status: DofStatus) -> Result<()> {
        self.inner_mut().put_status(index, status)
    }

    fn dof_derivative(&self, index: usize, point: &Point3) -> Result<Vector3> {
        self.inner().dof_derivative(index, point)
    }

    fn parameter_gradient(&self, samples: &[(Point3, Vector3)], gradient: &mut [f64]) -> Result<()> {
        self.inner().parameter_gradient(samples, gradient)
    }
}
