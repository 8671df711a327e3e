//! Histogram-based similarity: normalized and plain mutual information.
//!
//! Scores come from a hard-binned [`Histogram2D`] with the target along x and
//! the warped source along y, each axis spanning its image's intensity range.
//! Gradients come from a cubic B-spline Parzen estimate of the same
//! distribution, see [`ParzenJointHistogram`].

use rayon::prelude::*;
use regtk_core::spatial::Vector3;
use crate::error::{RegistrationError, Result};
use crate::histogram::Histogram2D;
use crate::metric::parzen::ParzenJointHistogram;
use crate::metric::Metric;
use crate::session::RegistrationSession;

/// Which information measure a [`JointHistogramMetric`] maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Information {
    Normalized,
    Mutual,
}

/// Shared machinery of the histogram-based metrics.
#[derive(Debug, Clone)]
struct JointHistogramMetric {
    template: Histogram2D,
    information: Information,
}

/// Widen a degenerate range so that it can carry bins.
fn intensity_range((min, max): (f64, f64)) -> (f64, f64) {
    if max - min > f64::EPSILON * max.abs().max(1.0) {
        (min, max)
    } else {
        (min, min + 1.0)
    }
}

impl JointHistogramMetric {
    fn new(
        bins: usize,
        target_range: (f64, f64),
        source_range: (f64, f64),
        information: Information,
    ) -> Result<Self> {
        let (tmin, tmax) = intensity_range(target_range);
        let (smin, smax) = intensity_range(source_range);
        Ok(Self {
            template: Histogram2D::with_range(tmin, tmax, smin, smax, bins, bins)?,
            information,
        })
    }

    fn name(&self) -> &'static str {
        match self.information {
            Information::Normalized => "NMI",
            Information::Mutual => "MI",
        }
    }

    /// Joint histogram of the overlap, accumulated per worker and merged.
    fn joint_histogram(&self, session: &RegistrationSession) -> Result<Histogram2D> {
        let template = &self.template;
        let histogram = session
            .overlapping()
            .fold(
                || template.empty_like(),
                |mut h, (_, t, s)| {
                    h.add_sample(t, s);
                    h
                },
            )
            .map(Ok::<_, RegistrationError>)
            .try_reduce(
                || template.empty_like(),
                |mut a, b| {
                    a.merge(&b)?;
                    Ok(a)
                },
            )?;

        if histogram.number_of_samples() == 0 {
            return Err(RegistrationError::no_overlap(format!(
                "{}: no target voxel samples the source",
                self.name()
            )));
        }
        Ok(histogram)
    }

    fn score(&self, histogram: &Histogram2D) -> f64 {
        match self.information {
            Information::Normalized => histogram.normalized_mutual_information(),
            Information::Mutual => histogram.mutual_information(),
        }
    }

    /// Continuous source bin coordinate, bin centres at integers.
    fn source_coordinate(&self, s: f64) -> f64 {
        let axis = self.template.axis_y();
        (s - axis.min()) / axis.width() - 0.5
    }

    fn evaluate(&self, session: &RegistrationSession) -> Result<f64> {
        let histogram = self.joint_histogram(session)?;
        Ok(self.score(&histogram))
    }

    /// Parzen estimate of the overlap's joint distribution.
    fn parzen_histogram(&self, session: &RegistrationSession) -> ParzenJointHistogram {
        let template = &self.template;
        let samples: Vec<(usize, f64)> = session
            .overlapping()
            .filter_map(|(_, t, s)| {
                let a = template.val_to_bin_x(t)?;
                template.val_to_bin_y(s)?;
                Some((a, self.source_coordinate(s)))
            })
            .collect();
        let (nx, ny) = template.number_of_bins();
        ParzenJointHistogram::from_samples(&samples, nx, ny)
    }

    fn parzen_score(&self, hx: f64, hy: f64, hxy: f64) -> f64 {
        match self.information {
            Information::Normalized if hxy > 0.0 => (hx + hy) / hxy,
            Information::Normalized => 0.0,
            Information::Mutual => hx + hy - hxy,
        }
    }

    fn smoothed_score(&self, session: &RegistrationSession) -> Result<f64> {
        let parzen = self.parzen_histogram(session);
        if parzen.total() <= 0.0 {
            return Err(RegistrationError::no_overlap(format!(
                "{}: no target voxel samples the source",
                self.name()
            )));
        }
        Ok(self.parzen_score(parzen.target_entropy(), parzen.source_entropy(), parzen.joint_entropy()))
    }

    fn evaluate_with_gradient(&self, session: &mut RegistrationSession) -> Result<f64> {
        let histogram = self.joint_histogram(session)?;
        let score = self.score(&histogram);

        let template = &self.template;
        let parzen = self.parzen_histogram(session);
        let hx = parzen.target_entropy();
        let hy = parzen.source_entropy();
        let hxy = parzen.joint_entropy();
        let inverse_width = 1.0 / template.axis_y().width();
        let information = self.information;

        session.compute_similarity_gradient(|t, s, gradient| {
            let (Some(a), Some(_)) = (template.val_to_bin_x(t), template.val_to_bin_y(s)) else {
                return Vector3::zeros();
            };
            let (d_hy, d_hxy) = parzen.entropy_derivatives(a, self.source_coordinate(s));
            let d_score = match information {
                Information::Normalized if hxy > 0.0 => (d_hy * hxy - (hx + hy) * d_hxy) / (hxy * hxy),
                Information::Normalized => 0.0,
                Information::Mutual => d_hy - d_hxy,
            };
            *gradient * (d_score * inverse_width)
        });

        tracing::debug!(
            "{} = {:.6} over {} samples (Parzen Hx {:.4}, Hy {:.4}, Hxy {:.4})",
            self.name(),
            score,
            histogram.number_of_samples(),
            hx,
            hy,
            hxy
        );
        Ok(score)
    }
}

/// Normalized mutual information `(Hx + Hy) / Hxy`.
#[derive(Debug, Clone)]
pub struct NormalizedMutualInformation {
    inner: JointHistogramMetric,
}

impl NormalizedMutualInformation {
    /// Create the metric.
    ///
    /// # Arguments
    /// * `bins` - Bins per axis of the joint histogram
    /// * `target_range` - Target intensity range `(min, max)`
    /// * `source_range` - Source intensity range `(min, max)`
    pub fn new(bins: usize, target_range: (f64, f64), source_range: (f64, f64)) -> Result<Self> {
        Ok(Self {
            inner: JointHistogramMetric::new(bins, target_range, source_range, Information::Normalized)?,
        })
    }

    /// Joint histogram of the current overlap.
    pub fn joint_histogram(&self, session: &RegistrationSession) -> Result<Histogram2D> {
        self.inner.joint_histogram(session)
    }

    /// NMI of the Parzen estimate of the current overlap.
    ///
    /// [`Metric::evaluate_with_gradient`] writes the gradient of this score,
    /// not of the hard-binned one it returns.
    pub fn smoothed_score(&self, session: &RegistrationSession) -> Result<f64> {
        self.inner.smoothed_score(session)
    }
}

impl Metric for NormalizedMutualInformation {
    fn evaluate(&self, session: &RegistrationSession) -> Result<f64> {
        self.inner.evaluate(session)
    }

    fn evaluate_with_gradient(&self, session: &mut RegistrationSession) -> Result<f64> {
        self.inner.evaluate_with_gradient(session)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Mutual information `Hx + Hy - Hxy`.
#[derive(Debug, Clone)]
pub struct MutualInformation {
    inner: JointHistogramMetric,
}

impl MutualInformation {
    /// Create the metric; arguments as for [`NormalizedMutualInformation::new`].
    pub fn new(bins: usize, target_range: (f64, f64), source_range: (f64, f64)) -> Result<Self> {
        Ok(Self {
            inner: JointHistogramMetric::new(bins, target_range, source_range, Information::Mutual)?,
        })
    }

    pub fn joint_histogram(&self, session: &RegistrationSession) -> Result<Histogram2D> {
        self.inner.joint_histogram(session)
    }

    /// MI of the Parzen estimate; see [`NormalizedMutualInformation::smoothed_score`].
    pub fn smoothed_score(&self, session: &RegistrationSession) -> Result<f64> {
        self.inner.smoothed_score(session)
    }
}

impl Metric for MutualInformation {
    fn evaluate(&self, session: &RegistrationSession) -> Result<f64> {
        self.inner.evaluate(session)
    }

    fn evaluate_with_gradient(&self, session: &mut RegistrationSession) -> Result<f64> {
        self.inner.evaluate_with_gradient(session)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
