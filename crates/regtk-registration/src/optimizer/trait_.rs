//! Optimizer trait for DOF optimization.

use crate::error::Result;

/// Function of a DOF vector to be maximized.
///
/// The objective owns the sequencing of image updates: `evaluate` warps the
/// source with the current DOFs before scoring, `evaluate_with_gradient`
/// additionally warps the source gradient.
pub trait Objective {
    fn number_of_dofs(&self) -> usize;

    /// Current DOF vector.
    fn dofs(&self) -> Vec<f64>;

    /// Replace the DOF vector.
    fn set_dofs(&mut self, dofs: &[f64]) -> Result<()>;

    /// Which DOFs the optimizer may change.
    fn active(&self) -> Vec<bool>;

    /// Score at the current DOFs.
    fn evaluate(&mut self) -> Result<f64>;

    /// Score and its gradient with respect to every DOF.
    ///
    /// # Arguments
    /// * `gradient` - Output of length `number_of_dofs()`, overwritten
    fn evaluate_with_gradient(&mut self, gradient: &mut [f64]) -> Result<f64>;
}

/// Why a level stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    /// The step length fell below the level's minimum step.
    StepBelowMinimum,
    /// An accepted step improved the score by less than epsilon.
    GainBelowEpsilon,
    /// The gradient vanished over the active DOFs.
    ZeroGradient,
    /// The iteration budget was exhausted.
    MaxIterations,
    /// A non-finite score was met; the last good DOFs were restored.
    NumericalInstability,
}

/// Result of one optimizer step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The update improved the score and was kept.
    Accepted { score: f64, gain: f64 },
    /// The update did not improve the score; DOFs were restored.
    Rejected { score: f64 },
    /// No further progress is possible at this step length.
    Converged { score: f64, reason: ConvergenceReason },
}

impl StepOutcome {
    /// Best score known after the step.
    pub fn score(&self) -> f64 {
        match *self {
            Self::Accepted { score, .. } | Self::Rejected { score } | Self::Converged { score, .. } => score,
        }
    }
}

/// Iterative maximizer of an [`Objective`].
pub trait Optimizer {
    /// Perform a single optimization step.
    ///
    /// A step never leaves the objective at a worse score than before it.
    fn step(&mut self, objective: &mut dyn Objective) -> Result<StepOutcome>;

    /// Get the current step length.
    fn step_length(&self) -> f64;

    /// Set the step length.
    fn set_step_length(&mut self, step: f64);

    /// Best score seen so far, if any.
    fn best_score(&self) -> Option<f64>;
}
