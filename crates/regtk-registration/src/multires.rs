//! Multi-resolution registration driver.
//!
//! Runs the single-level loop of [`Registration`] on a coarse-to-fine
//! pyramid. Level `L` of the configuration is blurred by its sigmas and
//! shrunk by its factor; levels run from the coarsest (`levels - 1`) down to
//! the finest (`0`), each starting from the transformation the previous one
//! left behind.
//!
//! Several image pairs can be registered with one transformation; each pair
//! gets its own level buffers and metric, and the optimizer maximizes the
//! weighted mean of the pair scores.

use std::marker::PhantomData;
use std::sync::Arc;

use burn::tensor::backend::Backend;
use regtk_core::filter::{DownsampleFilter, GaussianFilter};
use regtk_core::{Image, Transform, Transformation};

use crate::config::{LevelParameters, RegistrationConfig};
use crate::error::{RegistrationError, Result};
use crate::metric::create_metric;
use crate::optimizer::GradientDescent;
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::registration::{LevelReport, Registration};
use crate::session::RegistrationSession;
use crate::validation::{validate_config, validate_image, validate_weights};

/// Where a multi-resolution run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Uninitialized,
    /// Buffers of the level are being prepared.
    LevelInit(usize),
    Iterating(usize),
    /// The level finished and released its buffers.
    LevelDone(usize),
    /// All buffers released; the transformation holds the result.
    Finalized,
}

/// Per-level outcome of a run, coarsest level first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationReport {
    pub levels: Vec<LevelReport>,
}

impl RegistrationReport {
    /// Score reached on the finest level.
    pub fn final_score(&self) -> Option<f64> {
        self.levels.last().map(|level| level.final_score)
    }

    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|level| level.iterations).sum()
    }
}

/// Coarse-to-fine registration of a source image onto a target image.
///
/// # Type Parameters
/// * `B` - Backend the images live on; blurring and shrinking run there
///
/// # Examples
/// ```rust,no_run
/// use burn_ndarray::NdArray;
/// use regtk_core::{Image, Transformation};
/// use regtk_registration::{MultiResolutionRegistration, RegistrationConfig, SimilarityMeasure};
///
/// # fn run(target: Image<NdArray<f32>, 3>, source: Image<NdArray<f32>, 3>) -> regtk_registration::Result<()> {
/// let config = RegistrationConfig::pyramid(3).with_similarity(SimilarityMeasure::Nmi);
/// let mut registration = MultiResolutionRegistration::<NdArray<f32>>::new(config);
/// let mut transformation = Transformation::rigid();
/// let report = registration.run(&target, &source, &mut transformation)?;
/// println!("final score {:?}", report.final_score());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MultiResolutionRegistration<B: Backend> {
    config: RegistrationConfig,
    tracker: ProgressTracker,
    state: RegistrationState,
    sessions: Vec<RegistrationSession>,
    _b: PhantomData<B>,
}

impl<B: Backend> MultiResolutionRegistration<B> {
    pub fn new(config: RegistrationConfig) -> Self {
        Self {
            config,
            tracker: ProgressTracker::new(),
            state: RegistrationState::Uninitialized,
            sessions: Vec::new(),
            _b: PhantomData,
        }
    }

    /// Register a progress callback.
    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.tracker.add_callback(callback);
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Buffers of the first pair in the level in progress, `None` outside a level.
    pub fn session(&self) -> Option<&RegistrationSession> {
        self.sessions.first()
    }

    /// Buffers of every pair in the level in progress, empty outside a level.
    pub fn sessions(&self) -> &[RegistrationSession] {
        &self.sessions
    }

    fn transition(&mut self, state: RegistrationState) {
        match state {
            RegistrationState::LevelInit(_) | RegistrationState::Finalized => {
                tracing::info!("Registration state {:?} -> {:?}", self.state, state)
            }
            _ => tracing::debug!("Registration state {:?} -> {:?}", self.state, state),
        }
        self.state = state;
    }

    /// Register `source` onto `target`, updating `transformation` in place.
    ///
    /// On error the level buffers are released and callbacks are notified;
    /// the transformation keeps the DOFs of the last accepted step.
    ///
    /// # Arguments
    /// * `target` - Image defining the sampling grid
    /// * `source` - Image warped onto the target
    /// * `transformation` - Initial guess, overwritten with the result
    pub fn run(
        &mut self,
        target: &Image<B, 3>,
        source: &Image<B, 3>,
        transformation: &mut Transformation,
    ) -> Result<RegistrationReport> {
        self.run_weighted(&[(target, source)], &[1.0], transformation)
    }

    /// Register several `(target, source)` pairs with one transformation.
    ///
    /// Every level maximizes `Σ wᵢ scoreᵢ / Σ wᵢ`. Pairs with weight 0 are
    /// prepared but not evaluated.
    ///
    /// # Arguments
    /// * `pairs` - Image pairs, each target defining the grid of its pair
    /// * `weights` - One non-negative weight per pair, at least one positive
    /// * `transformation` - Initial guess, overwritten with the result
    pub fn run_weighted(
        &mut self,
        pairs: &[(&Image<B, 3>, &Image<B, 3>)],
        weights: &[f64],
        transformation: &mut Transformation,
    ) -> Result<RegistrationReport> {
        self.state = RegistrationState::Uninitialized;
        let result = self.execute(pairs, weights, transformation);
        if let Err(e) = &result {
            self.sessions.clear();
            tracing::error!("Registration failed in state {:?}: {}", self.state, e);
            self.tracker.error(&e.to_string());
        }
        result
    }

    fn execute(
        &mut self,
        pairs: &[(&Image<B, 3>, &Image<B, 3>)],
        weights: &[f64],
        transformation: &mut Transformation,
    ) -> Result<RegistrationReport> {
        validate_config(&self.config)?;
        if pairs.len() != weights.len() {
            return Err(RegistrationError::dimension_mismatch(format!(
                "{} image pairs but {} weights",
                pairs.len(),
                weights.len()
            )));
        }
        validate_weights(weights.iter().copied())?;
        for (index, &(target, source)) in pairs.iter().enumerate() {
            validate_image(&format!("target {}", index), target, &self.config)?;
            validate_image(&format!("source {}", index), source, &self.config)?;
        }

        tracing::info!(
            "Registering {} image pair(s) with {} over {} levels, {} DOFs",
            pairs.len(),
            self.config.similarity.name(),
            self.config.number_of_levels(),
            transformation.number_of_dofs()
        );
        self.tracker.start();

        let mut report = RegistrationReport::default();
        for level in (0..self.config.number_of_levels()).rev() {
            let parameters = self.config.levels[level].clone();

            self.transition(RegistrationState::LevelInit(level));
            let mut sessions = Vec::with_capacity(pairs.len());
            let mut terms = Vec::with_capacity(pairs.len());
            for (&(target, source), &weight) in pairs.iter().zip(weights) {
                let session = self.initialize_level(&parameters, target, source)?;
                let metric = create_metric(self.config.similarity, parameters.number_of_bins, &session)?;
                sessions.push(session);
                terms.push((metric, weight));
            }
            let dims = sessions
                .first()
                .map_or([0; 3], |session| session.target().geometry().dims());
            tracing::info!(
                "Level {}: {:?} voxels, blurring {}/{}, steps [{}, {}], {} iterations",
                level,
                dims,
                parameters.target_blurring,
                parameters.source_blurring,
                parameters.min_step,
                parameters.max_step,
                parameters.iterations
            );
            self.sessions = sessions;
            self.tracker.start_level(level, dims);

            self.transition(RegistrationState::Iterating(level));
            let optimizer = GradientDescent::new(parameters.max_step, parameters.min_step, self.config.epsilon);
            let mut registration = Registration::weighted(optimizer, terms);
            let level_report = registration.execute_pairs(
                &mut self.sessions,
                transformation,
                level,
                parameters.iterations,
                &self.tracker,
            )?;
            report.levels.push(level_report);

            self.transition(RegistrationState::LevelDone(level));
            self.sessions.clear();
        }

        self.transition(RegistrationState::Finalized);
        self.sessions.clear();
        if let Some(last) = report.levels.last() {
            self.tracker.complete(last.final_score, self.config.levels[0].min_step);
        }
        Ok(report)
    }

    /// Blur and shrink both images and allocate the level buffers.
    fn initialize_level(
        &self,
        parameters: &LevelParameters,
        target: &Image<B, 3>,
        source: &Image<B, 3>,
    ) -> Result<RegistrationSession> {
        let prepare = |image: &Image<B, 3>, sigma: f64, padding: f32| {
            let blurred = GaussianFilter::<B>::new(vec![sigma]).with_padding(padding).apply(image);
            let shrunk = if parameters.shrink_factor > 1 {
                DownsampleFilter::<B>::new(vec![parameters.shrink_factor]).apply(&blurred)
            } else {
                blurred
            };
            shrunk.to_volume()
        };

        let target = prepare(target, parameters.target_blurring, self.config.target_padding)?;
        let source = prepare(source, parameters.source_blurring, self.config.source_padding)?;
        Ok(RegistrationSession::new(
            target,
            source,
            self.config.target_padding,
            self.config.source_padding,
            self.config.interpolation,
        ))
    }
}
