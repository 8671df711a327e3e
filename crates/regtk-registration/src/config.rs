//! Registration configuration.
//!
//! A [`RegistrationConfig`] carries one [`LevelParameters`] per pyramid level
//! plus the settings shared by all levels. Level 0 is the finest; a run starts
//! at the last level and finishes at level 0.

use serde::{Deserialize, Serialize};
use regtk_core::interpolation::InterpolationMode;

/// Similarity measure maximized by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SimilarityMeasure {
    /// Negated sum of squared differences.
    Ssd,
    /// Normalized mutual information.
    #[default]
    Nmi,
    /// Mutual information.
    Mi,
}

impl SimilarityMeasure {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ssd => "SSD",
            Self::Nmi => "NMI",
            Self::Mi => "MI",
        }
    }

    /// Whether the measure is computed from a joint histogram.
    pub fn uses_histogram(&self) -> bool {
        matches!(self, Self::Nmi | Self::Mi)
    }
}

/// Settings of one resolution level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelParameters {
    /// Gaussian sigma applied to the target, in mm. Zero disables blurring.
    pub target_blurring: f64,
    /// Gaussian sigma applied to the source, in mm.
    pub source_blurring: f64,
    /// Integer downsampling factor applied to both images.
    pub shrink_factor: usize,
    /// Step length below which the level has converged.
    pub min_step: f64,
    /// Initial step length.
    pub max_step: f64,
    /// Maximum number of optimizer iterations.
    pub iterations: usize,
    /// Bins per axis of the joint histogram.
    pub number_of_bins: usize,
}

impl Default for LevelParameters {
    fn default() -> Self {
        Self {
            target_blurring: 0.0,
            source_blurring: 0.0,
            shrink_factor: 1,
            min_step: 0.01,
            max_step: 1.0,
            iterations: 40,
            number_of_bins: 64,
        }
    }
}

impl LevelParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the same blurring for target and source.
    pub fn with_blurring(mut self, sigma: f64) -> Self {
        self.target_blurring = sigma;
        self.source_blurring = sigma;
        self
    }

    pub fn with_target_blurring(mut self, sigma: f64) -> Self {
        self.target_blurring = sigma;
        self
    }

    pub fn with_source_blurring(mut self, sigma: f64) -> Self {
        self.source_blurring = sigma;
        self
    }

    pub fn with_shrink_factor(mut self, factor: usize) -> Self {
        self.shrink_factor = factor;
        self
    }

    /// Set the step bracket `[min_step, max_step]`.
    pub fn with_steps(mut self, min_step: f64, max_step: f64) -> Self {
        self.min_step = min_step;
        self.max_step = max_step;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_number_of_bins(mut self, bins: usize) -> Self {
        self.number_of_bins = bins;
        self
    }
}

/// Complete registration configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Per-level settings, finest first.
    pub levels: Vec<LevelParameters>,
    pub similarity: SimilarityMeasure,
    /// Target voxels at or below this value are ignored.
    pub target_padding: f32,
    /// Source samples at or below this value are outside the overlap.
    pub source_padding: f32,
    /// An accepted step improving the score by less than this ends the level.
    pub epsilon: f64,
    pub interpolation: InterpolationMode,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            levels: vec![LevelParameters::default()],
            similarity: SimilarityMeasure::default(),
            target_padding: -32768.0,
            source_padding: -32768.0,
            epsilon: 1e-4,
            interpolation: InterpolationMode::default(),
        }
    }
}

impl RegistrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coarse-to-fine pyramid with `levels` levels.
    ///
    /// Level `l` shrinks by `2^l` and blurs by half the shrink factor, in mm
    /// relative to unit spacing. Level 0 is unblurred.
    pub fn pyramid(levels: usize) -> Self {
        let levels = (0..levels.max(1))
            .map(|l| {
                let factor = 1usize << l;
                let sigma = if factor > 1 { 0.5 * factor as f64 } else { 0.0 };
                LevelParameters::default()
                    .with_shrink_factor(factor)
                    .with_blurring(sigma)
                    .with_steps(0.01, factor as f64)
            })
            .collect();
        Self {
            levels,
            ..Self::default()
        }
    }

    pub fn with_levels(mut self, levels: Vec<LevelParameters>) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityMeasure) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn with_target_padding(mut self, padding: f32) -> Self {
        self.target_padding = padding;
        self
    }

    pub fn with_source_padding(mut self, padding: f32) -> Self {
        self.source_padding = padding;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_interpolation(mut self, interpolation: InterpolationMode) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn number_of_levels(&self) -> usize {
        self.levels.len()
    }
}
