//! Working buffers of one resolution level.
//!
//! A [`RegistrationSession`] owns the blurred and shrunk target and source
//! of a level, the source gradient image, and per-target-voxel buffers for
//! the transformed source, its gradient, the similarity gradient and the
//! overlap mask. Buffers are sized to the target voxel count at creation and
//! dropped with the session.

use rayon::prelude::*;
use regtk_core::filter::GradientFilter;
use regtk_core::interpolation::{InterpolationMode, Interpolator};
use regtk_core::spatial::{Point3, Vector3};
use regtk_core::{Transform, Volume};

/// Engine-owned images and buffers for one level.
#[derive(Debug, Clone)]
pub struct RegistrationSession {
    target: Volume,
    source: Volume,
    source_gradient: [Volume; 3],
    target_padding: f32,
    source_padding: f32,
    interpolation: InterpolationMode,
    target_points: Vec<Point3>,
    transformed_source: Vec<f64>,
    transformed_gradient: Vec<Vector3>,
    similarity_gradient: Vec<Vector3>,
    overlap: Vec<bool>,
}

impl RegistrationSession {
    /// Allocate the buffers of a level.
    ///
    /// # Arguments
    /// * `target` - Blurred and shrunk target; defines the sampling grid
    /// * `source` - Blurred and shrunk source
    /// * `target_padding` - Target voxels at or below this value are skipped
    /// * `source_padding` - Source samples at or below this value are outside the overlap
    /// * `interpolation` - Scheme used to sample the source and its gradient
    pub fn new(
        target: Volume,
        source: Volume,
        target_padding: f32,
        source_padding: f32,
        interpolation: InterpolationMode,
    ) -> Self {
        let source_gradient = GradientFilter::new().with_padding(source_padding).apply(&source);
        let geometry = target.geometry();
        let n = target.len();
        let target_points = (0..n)
            .into_par_iter()
            .map(|offset| geometry.voxel_to_world(offset))
            .collect();

        Self {
            target,
            source,
            source_gradient,
            target_padding,
            source_padding,
            interpolation,
            target_points,
            transformed_source: vec![0.0; n],
            transformed_gradient: vec![Vector3::zeros(); n],
            similarity_gradient: vec![Vector3::zeros(); n],
            overlap: vec![false; n],
        }
    }

    pub fn target(&self) -> &Volume {
        &self.target
    }

    pub fn source(&self) -> &Volume {
        &self.source
    }

    pub fn source_gradient(&self) -> &[Volume; 3] {
        &self.source_gradient
    }

    pub fn target_padding(&self) -> f32 {
        self.target_padding
    }

    pub fn source_padding(&self) -> f32 {
        self.source_padding
    }

    /// Number of target voxels, the length of every buffer.
    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    /// Source value at each target voxel after the last update.
    pub fn transformed_source(&self) -> &[f64] {
        &self.transformed_source
    }

    /// World source gradient at each target voxel after the last gradient update.
    pub fn transformed_gradient(&self) -> &[Vector3] {
        &self.transformed_gradient
    }

    pub fn similarity_gradient(&self) -> &[Vector3] {
        &self.similarity_gradient
    }

    pub fn similarity_gradient_mut(&mut self) -> &mut [Vector3] {
        &mut self.similarity_gradient
    }

    /// Whether each target voxel contributes to the similarity.
    pub fn overlap(&self) -> &[bool] {
        &self.overlap
    }

    pub fn number_of_overlapping(&self) -> usize {
        self.overlap.par_iter().filter(|&&inside| inside).count()
    }

    /// Warp the source into the target grid with the current DOFs.
    ///
    /// A voxel overlaps when its target value is above the target padding and
    /// every source voxel its sample is interpolated from is above the source
    /// padding.
    pub fn update_source<T: Transform + ?Sized>(&mut self, transformation: &T) {
        let Self {
            target,
            source,
            target_padding,
            source_padding,
            interpolation,
            target_points,
            transformed_source,
            overlap,
            ..
        } = self;
        let (target, source, target_points) = (target.data(), &*source, &*target_points);
        let (target_padding, source_padding, interpolation) = (*target_padding, *source_padding, *interpolation);

        transformed_source
            .par_iter_mut()
            .zip(overlap.par_iter_mut())
            .enumerate()
            .for_each(|(offset, (value, inside))| {
                *inside = false;
                *value = 0.0;
                if target[offset] <= target_padding {
                    return;
                }
                let q = transformation.transform_point(&target_points[offset]);
                let index = source.geometry().world_to_index(&q);
                if let Some(s) = interpolation.interpolate_padded(source, &index, source_padding) {
                    *value = s;
                    *inside = true;
                }
            });
    }

    /// Warp the source and its gradient into the target grid.
    pub fn update_source_and_gradient<T: Transform + ?Sized>(&mut self, transformation: &T) {
        let Self {
            target,
            source,
            source_gradient,
            target_padding,
            source_padding,
            interpolation,
            target_points,
            transformed_source,
            transformed_gradient,
            overlap,
            ..
        } = self;
        let (target, source, source_gradient, target_points) =
            (target.data(), &*source, &*source_gradient, &*target_points);
        let (target_padding, source_padding, interpolation) = (*target_padding, *source_padding, *interpolation);

        transformed_source
            .par_iter_mut()
            .zip(transformed_gradient.par_iter_mut())
            .zip(overlap.par_iter_mut())
            .enumerate()
            .for_each(|(offset, ((value, gradient), inside))| {
                *inside = false;
                *value = 0.0;
                *gradient = Vector3::zeros();
                if target[offset] <= target_padding {
                    return;
                }
                let q = transformation.transform_point(&target_points[offset]);
                let index = source.geometry().world_to_index(&q);
                let Some(s) = interpolation.interpolate_padded(source, &index, source_padding) else {
                    return;
                };
                *value = s;
                *inside = true;
                for (axis, component) in source_gradient.iter().enumerate() {
                    gradient[axis] = interpolation.interpolate(component, &index).unwrap_or(0.0);
                }
            });
    }

    /// `(target world point, similarity gradient)` for every overlapping voxel
    /// with a non-zero gradient.
    pub fn gradient_samples(&self) -> Vec<(Point3, Vector3)> {
        (0..self.len())
            .into_par_iter()
            .filter(|&offset| self.overlap[offset])
            .filter_map(|offset| {
                let g = self.similarity_gradient[offset];
                (g.norm() > 0.0).then(|| (self.target_points[offset], g))
            })
            .collect()
    }

    /// Target value, warped source value and voxel offset of every overlapping voxel.
    pub fn overlapping(&self) -> impl ParallelIterator<Item = (usize, f64, f64)> + '_ {
        (0..self.len())
            .into_par_iter()
            .filter(move |&offset| self.overlap[offset])
            .map(move |offset| {
                (
                    offset,
                    self.target.data()[offset] as f64,
                    self.transformed_source[offset],
                )
            })
    }

    /// Fill the similarity gradient of every overlapping voxel from its target
    /// value, warped source value and warped source gradient. Other voxels get
    /// a zero gradient.
    pub fn compute_similarity_gradient<F>(&mut self, f: F)
    where
        F: Fn(f64, f64, &Vector3) -> Vector3 + Sync + Send,
    {
        let Self {
            target,
            transformed_source,
            transformed_gradient,
            similarity_gradient,
            overlap,
            ..
        } = self;
        let target = target.data();
        let (transformed_source, transformed_gradient, overlap) =
            (&*transformed_source, &*transformed_gradient, &*overlap);

        similarity_gradient
            .par_iter_mut()
            .enumerate()
            .for_each(|(offset, g)| {
                *g = if overlap[offset] {
                    f(target[offset] as f64, transformed_source[offset], &transformed_gradient[offset])
                } else {
                    Vector3::zeros()
                };
            });
    }

    /// Zero the similarity gradient buffer.
    pub fn clear_similarity_gradient(&mut self) {
        self.similarity_gradient
            .par_iter_mut()
            .for_each(|g| *g = Vector3::zeros());
    }
}
