//! Optimizers driving the DOF vector of a transformation.

pub mod trait_;
pub mod gradient_descent;

pub use trait_::{ConvergenceReason, Objective, Optimizer, StepOutcome};
pub use gradient_descent::GradientDescent;
