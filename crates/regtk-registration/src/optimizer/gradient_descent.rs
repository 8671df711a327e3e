//! Gradient ascent hill climbing with step halving.

use crate::error::{RegistrationError, Result};
use crate::optimizer::{ConvergenceReason, Objective, Optimizer, StepOutcome};

/// Hill-climbing gradient ascent.
///
/// Each step moves the active DOFs by `step_length` along the gradient
/// normalized over the active DOFs. An update that does not improve the
/// score is reverted and the step length halved; the same direction is then
/// retried. A candidate that leaves no overlap counts as a rejection. The
/// gradient is recomputed only after an accepted update.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    step_length: f64,
    min_step: f64,
    epsilon: f64,
    score: Option<f64>,
    direction: Option<Vec<f64>>,
}

impl GradientDescent {
    /// Create a new optimizer.
    ///
    /// # Arguments
    /// * `max_step` - Initial step length
    /// * `min_step` - Step length below which the optimizer has converged
    /// * `epsilon` - Accepted gains below this end the optimization
    pub fn new(max_step: f64, min_step: f64, epsilon: f64) -> Self {
        Self {
            step_length: max_step,
            min_step,
            epsilon,
            score: None,
            direction: None,
        }
    }

    /// Unit direction of the gradient over the active DOFs, `None` if it vanishes.
    fn normalized(gradient: &[f64], active: &[bool]) -> Option<Vec<f64>> {
        let norm = gradient
            .iter()
            .zip(active)
            .filter(|&(_, &a)| a)
            .map(|(g, _)| g * g)
            .sum::<f64>()
            .sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return None;
        }
        Some(
            gradient
                .iter()
                .zip(active)
                .map(|(g, &a)| if a { g / norm } else { 0.0 })
                .collect(),
        )
    }

    fn converged(&self, reason: ConvergenceReason) -> StepOutcome {
        StepOutcome::Converged {
            score: self.score.unwrap_or(f64::NEG_INFINITY),
            reason,
        }
    }
}

impl Optimizer for GradientDescent {
    fn step(&mut self, objective: &mut dyn Objective) -> Result<StepOutcome> {
        if self.step_length < self.min_step {
            return Ok(self.converged(ConvergenceReason::StepBelowMinimum));
        }

        let direction = match self.direction.take() {
            Some(direction) => direction,
            None => {
                let mut gradient = vec![0.0; objective.number_of_dofs()];
                let score = objective.evaluate_with_gradient(&mut gradient)?;
                if !score.is_finite() {
                    return Err(RegistrationError::numerical_instability(format!(
                        "score {} at the current DOFs",
                        score
                    )));
                }
                self.score = Some(score);
                match Self::normalized(&gradient, &objective.active()) {
                    Some(direction) => direction,
                    None => return Ok(self.converged(ConvergenceReason::ZeroGradient)),
                }
            }
        };
        let score = self.score.unwrap_or(f64::NEG_INFINITY);

        let previous = objective.dofs();
        let candidate: Vec<f64> = previous
            .iter()
            .zip(&direction)
            .map(|(x, d)| x + self.step_length * d)
            .collect();
        objective.set_dofs(&candidate)?;
        let new_score = match objective.evaluate() {
            Ok(new_score) => new_score,
            Err(RegistrationError::NoOverlap(msg)) => {
                objective.set_dofs(&previous)?;
                self.step_length *= 0.5;
                self.direction = Some(direction);
                tracing::debug!("Rejected step without overlap ({}), step halved to {:.4}", msg, self.step_length);
                return Ok(StepOutcome::Rejected { score });
            }
            Err(e) => {
                objective.set_dofs(&previous)?;
                return Err(e);
            }
        };

        if !new_score.is_finite() {
            objective.set_dofs(&previous)?;
            return Err(RegistrationError::numerical_instability(format!(
                "score {} after a step of {}",
                new_score, self.step_length
            )));
        }

        if new_score > score {
            let gain = new_score - score;
            self.score = Some(new_score);
            tracing::debug!("Accepted step {:.4}: score {:.6} (+{:.3e})", self.step_length, new_score, gain);
            if gain < self.epsilon {
                return Ok(self.converged(ConvergenceReason::GainBelowEpsilon));
            }
            return Ok(StepOutcome::Accepted { score: new_score, gain });
        }

        objective.set_dofs(&previous)?;
        self.step_length *= 0.5;
        self.direction = Some(direction);
        tracing::debug!("Rejected step: score {:.6}, step halved to {:.4}", new_score, self.step_length);
        Ok(StepOutcome::Rejected { score })
    }

    fn step_length(&self) -> f64 {
        self.step_length
    }

    fn set_step_length(&mut self, step: f64) {
        self.step_length = step;
    }

    fn best_score(&self) -> Option<f64> {
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `-(x - 3)² - (y + 1)²` with `z` passive.
    struct Paraboloid {
        x: Vec<f64>,
    }

    impl Objective for Paraboloid {
        fn number_of_dofs(&self) -> usize {
            3
        }

        fn dofs(&self) -> Vec<f64> {
            self.x.clone()
        }

        fn set_dofs(&mut self, dofs: &[f64]) -> Result<()> {
            self.x = dofs.to_vec();
            Ok(())
        }

        fn active(&self) -> Vec<bool> {
            vec![true, true, false]
        }

        fn evaluate(&mut self) -> Result<f64> {
            Ok(-(self.x[0] - 3.0).powi(2) - (self.x[1] + 1.0).powi(2) - self.x[2].powi(2))
        }

        fn evaluate_with_gradient(&mut self, gradient: &mut [f64]) -> Result<f64> {
            gradient[0] = -2.0 * (self.x[0] - 3.0);
            gradient[1] = -2.0 * (self.x[1] + 1.0);
            gradient[2] = -2.0 * self.x[2];
            self.evaluate()
        }
    }

    fn run(optimizer: &mut GradientDescent, objective: &mut dyn Objective) -> (Vec<StepOutcome>, ConvergenceReason) {
        let mut outcomes = Vec::new();
        for _ in 0..200 {
            let outcome = optimizer.step(objective).unwrap();
            outcomes.push(outcome);
            if let StepOutcome::Converged { reason, .. } = outcome {
                return (outcomes, reason);
            }
        }
        (outcomes, ConvergenceReason::MaxIterations)
    }

    #[test]
    fn test_climbs_to_the_maximum() {
        let mut objective = Paraboloid { x: vec![0.0, 0.0, 0.5] };
        let mut optimizer = GradientDescent::new(1.0, 1e-3, 0.0);
        let (_, reason) = run(&mut optimizer, &mut objective);

        assert!(matches!(reason, ConvergenceReason::StepBelowMinimum | ConvergenceReason::ZeroGradient));
        assert!((objective.x[0] - 3.0).abs() < 1e-2);
        assert!((objective.x[1] + 1.0).abs() < 1e-2);
        assert_eq!(objective.x[2], 0.5);
    }

    #[test]
    fn test_scores_never_decrease() {
        let mut objective = Paraboloid { x: vec![-4.0, 6.0, 0.0] };
        let mut optimizer = GradientDescent::new(2.0, 1e-3, 0.0);
        let (outcomes, _) = run(&mut optimizer, &mut objective);

        let scores: Vec<f64> = outcomes.iter().map(StepOutcome::score).collect();
        assert!(scores.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_rejection_halves_the_step() {
        // at the optimum every move is worse
        let mut objective = Paraboloid { x: vec![3.0, -1.0, 0.0] };
        let mut optimizer = GradientDescent::new(1.0, 0.1, 0.0);
        let outcome = optimizer.step(&mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::Converged { reason: ConvergenceReason::ZeroGradient, .. }));

        let mut objective = Paraboloid { x: vec![3.5, -1.0, 0.0] };
        let mut optimizer = GradientDescent::new(2.0, 0.1, 0.0);
        let outcome = optimizer.step(&mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::Rejected { .. }));
        assert_eq!(optimizer.step_length(), 1.0);
        assert_eq!(objective.x, vec![3.5, -1.0, 0.0]);

        // 3.5 - 1.0 = 2.5 is no better; 3.5 - 0.5 = 3.0 is
        assert!(matches!(optimizer.step(&mut objective).unwrap(), StepOutcome::Rejected { .. }));
        let outcome = optimizer.step(&mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::Accepted { .. }));
        assert_eq!(objective.x[0], 3.0);
    }

    #[test]
    fn test_small_gain_converges() {
        let mut objective = Paraboloid { x: vec![3.01, -1.0, 0.0] };
        let mut optimizer = GradientDescent::new(0.01, 1e-4, 1.0);
        let outcome = optimizer.step(&mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::Converged { reason: ConvergenceReason::GainBelowEpsilon, .. }));
        assert!((objective.x[0] - 3.0).abs() < 1e-12);
    }

    /// Paraboloid whose images only overlap for `|x| <= 4`.
    struct Bounded {
        inner: Paraboloid,
        fail_with_other: bool,
    }

    impl Objective for Bounded {
        fn number_of_dofs(&self) -> usize {
            3
        }
        fn dofs(&self) -> Vec<f64> {
            self.inner.dofs()
        }
        fn set_dofs(&mut self, dofs: &[f64]) -> Result<()> {
            self.inner.set_dofs(dofs)
        }
        fn active(&self) -> Vec<bool> {
            self.inner.active()
        }
        fn evaluate(&mut self) -> Result<f64> {
            if self.inner.x[0].abs() > 4.0 {
                return Err(if self.fail_with_other {
                    RegistrationError::metric("sampling failed")
                } else {
                    RegistrationError::no_overlap("outside")
                });
            }
            self.inner.evaluate()
        }
        fn evaluate_with_gradient(&mut self, gradient: &mut [f64]) -> Result<f64> {
            self.inner.evaluate_with_gradient(gradient)
        }
    }

    #[test]
    fn test_step_without_overlap_is_rejected() {
        let mut objective = Bounded {
            inner: Paraboloid { x: vec![0.0, -1.0, 0.0] },
            fail_with_other: false,
        };
        let mut optimizer = GradientDescent::new(16.0, 0.1, 0.0);

        let outcome = optimizer.step(&mut objective).unwrap();
        assert!(matches!(outcome, StepOutcome::Rejected { .. }));
        assert_eq!(objective.dofs(), vec![0.0, -1.0, 0.0]);
        assert_eq!(optimizer.step_length(), 8.0);

        // 16 -> 8 -> 4 is inside the overlap again
        let (_, reason) = run(&mut optimizer, &mut objective);
        assert_ne!(reason, ConvergenceReason::MaxIterations);
        assert!((objective.dofs()[0] - 3.0).abs() < 0.1);
    }

    #[test]
    fn test_failed_evaluation_restores_dofs() {
        let mut objective = Bounded {
            inner: Paraboloid { x: vec![0.0, -1.0, 0.0] },
            fail_with_other: true,
        };
        let mut optimizer = GradientDescent::new(16.0, 0.1, 0.0);

        let result = optimizer.step(&mut objective);
        assert!(matches!(result, Err(RegistrationError::MetricError(_))));
        assert_eq!(objective.dofs(), vec![0.0, -1.0, 0.0]);
    }

    struct Exploding;

    impl Objective for Exploding {
        fn number_of_dofs(&self) -> usize {
            1
        }
        fn dofs(&self) -> Vec<f64> {
            vec![0.0]
        }
        fn set_dofs(&mut self, _dofs: &[f64]) -> Result<()> {
            Ok(())
        }
        fn active(&self) -> Vec<bool> {
            vec![true]
        }
        fn evaluate(&mut self) -> Result<f64> {
            Ok(f64::NAN)
        }
        fn evaluate_with_gradient(&mut self, gradient: &mut [f64]) -> Result<f64> {
            gradient[0] = 1.0;
            Ok(0.0)
        }
    }

    #[test]
    fn test_non_finite_score_is_an_error() {
        let mut optimizer = GradientDescent::new(1.0, 0.1, 0.0);
        let result = optimizer.step(&mut Exploding);
        assert!(matches!(result, Err(RegistrationError::NumericalInstability(_))));
    }
}
