//! Metric trait for image similarity measurement.

use crate::error::Result;
use crate::session::RegistrationSession;

/// Similarity between the target and the warped source of a session.
///
/// Higher scores mean better alignment. Both methods read the warped source
/// left in the session by the last `update_source*` call; the caller is
/// responsible for refreshing it after changing the transformation.
pub trait Metric: Send + Sync + std::fmt::Debug {
    /// Score of the current warped source.
    ///
    /// # Returns
    /// The score, or `NoOverlap` when no voxel contributes
    fn evaluate(&self, session: &RegistrationSession) -> Result<f64>;

    /// Score, also writing `∂score/∂q` for each voxel into the session's
    /// similarity gradient, `q` being the world position the voxel samples
    /// the source at. Needs `update_source_and_gradient`.
    fn evaluate_with_gradient(&self, session: &mut RegistrationSession) -> Result<f64>;

    fn name(&self) -> &'static str;
}
