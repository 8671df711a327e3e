//! Sum of squared differences.

use rayon::prelude::*;
use crate::error::{RegistrationError, Result};
use crate::metric::Metric;
use crate::session::RegistrationSession;

/// Negated sum of squared intensity differences, `-Σ (t - s)²`.
///
/// The score is not normalized by the overlap size. Per-voxel gradient is
/// `2 (t - s) ∇s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumOfSquaredDifferences;

impl SumOfSquaredDifferences {
    pub fn new() -> Self {
        Self
    }
}

impl Metric for SumOfSquaredDifferences {
    fn evaluate(&self, session: &RegistrationSession) -> Result<f64> {
        let (sum, count) = session
            .overlapping()
            .map(|(_, t, s)| ((t - s) * (t - s), 1usize))
            .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1));

        if count == 0 {
            return Err(RegistrationError::no_overlap(
                "SSD: no target voxel samples the source",
            ));
        }
        Ok(-sum)
    }

    fn evaluate_with_gradient(&self, session: &mut RegistrationSession) -> Result<f64> {
        let score = self.evaluate(session)?;
        session.compute_similarity_gradient(|t, s, gradient| *gradient * (2.0 * (t - s)));
        Ok(score)
    }

    fn name(&self) -> &'static str {
        "SSD"
    }
}
