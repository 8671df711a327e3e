//! Single-level registration loop.

use regtk_core::{DofStatus, Transform, Transformation};
use crate::error::{RegistrationError, Result};
use crate::metric::Metric;
use crate::optimizer::{ConvergenceReason, Objective, Optimizer, StepOutcome};
use crate::progress::ProgressTracker;
use crate::session::RegistrationSession;
use crate::validation::validate_weights;

/// One image pair of a level.
#[derive(Debug)]
struct Term<'a> {
    session: &'a mut RegistrationSession,
    metric: &'a dyn Metric,
    weight: f64,
}

/// Similarity as a function of a transformation's DOFs.
///
/// With several image pairs the score is the weighted mean of the pair
/// scores, and the gradient the weighted mean of the pair gradients. Pairs
/// with weight 0 are not evaluated.
#[derive(Debug)]
pub struct LevelObjective<'a> {
    transformation: &'a mut Transformation,
    terms: Vec<Term<'a>>,
    total_weight: f64,
}

impl<'a> LevelObjective<'a> {
    pub fn new(
        transformation: &'a mut Transformation,
        session: &'a mut RegistrationSession,
        metric: &'a dyn Metric,
    ) -> Self {
        Self {
            transformation,
            terms: vec![Term {
                session,
                metric,
                weight: 1.0,
            }],
            total_weight: 1.0,
        }
    }

    /// Objective over several image pairs sharing one transformation.
    ///
    /// # Arguments
    /// * `transformation` - Transformation whose DOFs are optimized
    /// * `pairs` - `(session, metric, weight)` of every pair
    ///
    /// # Errors
    /// `InvalidConfiguration` when a weight is negative or not finite, or
    /// when no pair has a positive weight
    pub fn weighted(
        transformation: &'a mut Transformation,
        pairs: Vec<(&'a mut RegistrationSession, &'a dyn Metric, f64)>,
    ) -> Result<Self> {
        validate_weights(pairs.iter().map(|(_, _, weight)| *weight))?;
        let terms: Vec<Term<'a>> = pairs
            .into_iter()
            .filter(|(_, _, weight)| *weight > 0.0)
            .map(|(session, metric, weight)| Term { session, metric, weight })
            .collect();
        let total_weight = terms.iter().map(|term| term.weight).sum();
        Ok(Self {
            transformation,
            terms,
            total_weight,
        })
    }

    /// Voxels in the overlap of every pair at the last evaluation.
    pub fn number_of_overlapping(&self) -> usize {
        self.terms.iter().map(|term| term.session.number_of_overlapping()).sum()
    }
}

impl Objective for LevelObjective<'_> {
    fn number_of_dofs(&self) -> usize {
        self.transformation.number_of_dofs()
    }

    fn dofs(&self) -> Vec<f64> {
        self.transformation.dofs()
    }

    fn set_dofs(&mut self, dofs: &[f64]) -> Result<()> {
        self.transformation.set_dofs(dofs)?;
        Ok(())
    }

    fn active(&self) -> Vec<bool> {
        (0..self.transformation.number_of_dofs())
            .map(|i| matches!(self.transformation.status(i), Ok(DofStatus::Active)))
            .collect()
    }

    fn evaluate(&mut self) -> Result<f64> {
        let transformation = &*self.transformation;
        let mut score = 0.0;
        for term in self.terms.iter_mut() {
            term.session.update_source(transformation);
            score += term.weight * term.metric.evaluate(term.session)?;
        }
        Ok(score / self.total_weight)
    }

    fn evaluate_with_gradient(&mut self, gradient: &mut [f64]) -> Result<f64> {
        let transformation = &*self.transformation;
        gradient.fill(0.0);
        let mut pair_gradient = vec![0.0; gradient.len()];
        let mut score = 0.0;
        for term in self.terms.iter_mut() {
            term.session.update_source_and_gradient(transformation);
            score += term.weight * term.metric.evaluate_with_gradient(term.session)?;

            pair_gradient.fill(0.0);
            let samples = term.session.gradient_samples();
            transformation.parameter_gradient(&samples, &mut pair_gradient)?;
            let scale = term.weight / self.total_weight;
            for (g, p) in gradient.iter_mut().zip(&pair_gradient) {
                *g += scale * p;
            }
        }
        Ok(score / self.total_weight)
    }
}

/// Outcome of one resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub level: usize,
    /// Voxel grid the level was evaluated on.
    pub dims: [usize; 3],
    /// Score before the first step.
    pub initial_score: f64,
    /// Best score reached; the transformation holds the matching DOFs.
    pub final_score: f64,
    /// Optimizer steps taken.
    pub iterations: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub reason: ConvergenceReason,
}

/// Runs an optimizer against the metrics of one level.
pub struct Registration<O: Optimizer> {
    optimizer: O,
    /// Metric and weight of every image pair.
    terms: Vec<(Box<dyn Metric>, f64)>,
}

impl<O: Optimizer> Registration<O> {
    pub fn new(optimizer: O, metric: Box<dyn Metric>) -> Self {
        Self {
            optimizer,
            terms: vec![(metric, 1.0)],
        }
    }

    /// Registration of several image pairs, one `(metric, weight)` per pair.
    pub fn weighted(optimizer: O, terms: Vec<(Box<dyn Metric>, f64)>) -> Self {
        Self { optimizer, terms }
    }

    /// Metric of the first pair.
    pub fn metric(&self) -> Option<&dyn Metric> {
        self.terms.first().map(|(metric, _)| metric.as_ref())
    }

    /// Iterate until convergence or until `iterations` steps were taken.
    ///
    /// A non-finite score ends the level with the last good DOFs in place;
    /// every other error aborts.
    ///
    /// # Arguments
    /// * `session` - Working buffers of the level
    /// * `transformation` - Updated in place
    /// * `level` - Level index, for reporting
    /// * `iterations` - Step budget
    /// * `tracker` - Receives one update per step
    pub fn execute(
        &mut self,
        session: &mut RegistrationSession,
        transformation: &mut Transformation,
        level: usize,
        iterations: usize,
        tracker: &ProgressTracker,
    ) -> Result<LevelReport> {
        self.execute_pairs(std::slice::from_mut(session), transformation, level, iterations, tracker)
    }

    /// [`execute`](Self::execute) over one session per image pair, in the
    /// order of the metrics.
    pub fn execute_pairs(
        &mut self,
        sessions: &mut [RegistrationSession],
        transformation: &mut Transformation,
        level: usize,
        iterations: usize,
        tracker: &ProgressTracker,
    ) -> Result<LevelReport> {
        if sessions.len() != self.terms.len() {
            return Err(RegistrationError::dimension_mismatch(format!(
                "{} sessions for {} metrics",
                sessions.len(),
                self.terms.len()
            )));
        }
        let dims = sessions
            .first()
            .map(|session| session.target().geometry().dims())
            .unwrap_or_default();
        let name = self.terms.first().map_or("none", |(metric, _)| metric.name());
        let pairs = sessions
            .iter_mut()
            .zip(&self.terms)
            .map(|(session, (metric, weight))| (session, metric.as_ref(), *weight))
            .collect();
        let mut objective = LevelObjective::weighted(transformation, pairs)?;

        let initial_score = objective.evaluate()?;
        if !initial_score.is_finite() {
            return Err(RegistrationError::numerical_instability(format!(
                "{} score {} at level {} start",
                name,
                initial_score,
                level
            )));
        }

        let mut report = LevelReport {
            level,
            dims,
            initial_score,
            final_score: initial_score,
            iterations: 0,
            accepted: 0,
            rejected: 0,
            reason: ConvergenceReason::MaxIterations,
        };

        for iteration in 1..=iterations {
            let outcome = match self.optimizer.step(&mut objective) {
                Ok(outcome) => outcome,
                Err(RegistrationError::NumericalInstability(msg)) => {
                    tracing::warn!("Level {} stopped at iteration {}: {}", level, iteration, msg);
                    report.reason = ConvergenceReason::NumericalInstability;
                    break;
                }
                Err(e) => return Err(e),
            };
            report.iterations = iteration;

            let converged = match outcome {
                StepOutcome::Accepted { .. } => {
                    report.accepted += 1;
                    None
                }
                StepOutcome::Rejected { .. } => {
                    report.rejected += 1;
                    None
                }
                StepOutcome::Converged { reason, .. } => {
                    if reason == ConvergenceReason::GainBelowEpsilon {
                        report.accepted += 1;
                    }
                    Some(reason)
                }
            };
            tracker.update(
                level,
                iteration,
                Some(iterations),
                outcome.score(),
                self.optimizer.step_length(),
                &[
                    ("accepted", report.accepted as f64),
                    ("rejected", report.rejected as f64),
                    ("overlap", objective.number_of_overlapping() as f64),
                ],
            );

            if let Some(reason) = converged {
                report.reason = reason;
                break;
            }
        }

        report.final_score = self
            .optimizer
            .best_score()
            .map_or(initial_score, |best| best.max(initial_score));
        tracing::info!(
            "Level {} finished after {} iterations ({:?}): {} {:.6} -> {:.6}",
            level,
            report.iterations,
            report.reason,
            name,
            report.initial_score,
            report.final_score
        );
        Ok(report)
    }
}
