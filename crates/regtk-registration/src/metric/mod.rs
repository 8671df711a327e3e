//! Similarity metrics.
//!
//! SSD, NMI and MI evaluated over the working buffers of a
//! [`RegistrationSession`](crate::session::RegistrationSession).

pub mod trait_;
pub mod ssd;
pub mod nmi;
pub mod parzen;

pub use trait_::Metric;
pub use ssd::SumOfSquaredDifferences;
pub use nmi::{MutualInformation, NormalizedMutualInformation};
pub use parzen::ParzenJointHistogram;

use crate::config::SimilarityMeasure;
use crate::error::{RegistrationError, Result};
use crate::session::RegistrationSession;

/// Build the metric of a level.
///
/// Histogram-based measures span the intensity range of the session's
/// target and source above their padding values.
///
/// # Arguments
/// * `measure` - Similarity measure to build
/// * `bins` - Bins per histogram axis; ignored by SSD
/// * `session` - Level buffers the metric will evaluate
pub fn create_metric(
    measure: SimilarityMeasure,
    bins: usize,
    session: &RegistrationSession,
) -> Result<Box<dyn Metric>> {
    if !measure.uses_histogram() {
        return Ok(Box::new(SumOfSquaredDifferences::new()));
    }

    let range = |volume: &regtk_core::Volume, padding: f32, name: &str| -> Result<(f64, f64)> {
        volume
            .min_max(Some(padding))
            .map(|(lo, hi)| (lo as f64, hi as f64))
            .ok_or_else(|| {
                RegistrationError::no_overlap(format!("{} image has no voxel above the padding value", name))
            })
    };
    let target_range = range(session.target(), session.target_padding(), "target")?;
    let source_range = range(session.source(), session.source_padding(), "source")?;
    tracing::debug!(
        "{} histogram: {} bins, target {:?}, source {:?}",
        measure.name(),
        bins,
        target_range,
        source_range
    );

    Ok(match measure {
        SimilarityMeasure::Mi => Box::new(MutualInformation::new(bins, target_range, source_range)?),
        _ => Box::new(NormalizedMutualInformation::new(bins, target_range, source_range)?),
    })
}
