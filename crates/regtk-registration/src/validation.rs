//! Validation of registration inputs.
//!
//! Configurations and images are checked once before a run so that the
//! per-level loop can assume sane parameters.

use burn::tensor::backend::Backend;
use regtk_core::image::Image;
use crate::config::{LevelParameters, RegistrationConfig};
use crate::error::{RegistrationError, Result};

/// Validate iteration count.
pub fn validate_iterations(iterations: usize) -> Result<()> {
    if iterations == 0 {
        return Err(RegistrationError::invalid_configuration(
            "Iterations must be positive",
        ));
    }

    if iterations > 1_000_000 {
        return Err(RegistrationError::invalid_configuration(
            format!("Iterations too large: {}", iterations),
        ));
    }

    Ok(())
}

/// Validate a step bracket.
pub fn validate_steps(min_step: f64, max_step: f64) -> Result<()> {
    if !(min_step.is_finite() && min_step > 0.0) {
        return Err(RegistrationError::invalid_configuration(
            format!("Minimum step must be positive, got {}", min_step),
        ));
    }

    if !(max_step.is_finite() && max_step >= min_step) {
        return Err(RegistrationError::invalid_configuration(format!(
            "Maximum step ({}) must be at least the minimum step ({})",
            max_step, min_step
        )));
    }

    Ok(())
}

/// Validate the number of joint histogram bins.
pub fn validate_histogram_params(num_bins: usize) -> Result<()> {
    if num_bins < 2 {
        return Err(RegistrationError::invalid_configuration(
            format!("Number of bins must be at least 2, got {}", num_bins),
        ));
    }

    if num_bins > 1024 {
        return Err(RegistrationError::invalid_configuration(
            format!("Number of bins too large: {}", num_bins),
        ));
    }

    Ok(())
}

fn validate_level(index: usize, level: &LevelParameters, histogram: bool) -> Result<()> {
    let context = |e: RegistrationError| match e {
        RegistrationError::InvalidConfiguration(msg) => {
            RegistrationError::invalid_configuration(format!("level {}: {}", index, msg))
        }
        other => other,
    };

    for (name, sigma) in [("target", level.target_blurring), ("source", level.source_blurring)] {
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "level {}: {} blurring must be non-negative, got {}",
                index, name, sigma
            )));
        }
    }
    if level.shrink_factor == 0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "level {}: shrink factor must be at least 1",
            index
        )));
    }

    validate_iterations(level.iterations).map_err(context)?;
    validate_steps(level.min_step, level.max_step).map_err(context)?;
    if histogram {
        validate_histogram_params(level.number_of_bins).map_err(context)?;
    }
    Ok(())
}

/// Validate a complete configuration.
pub fn validate_config(config: &RegistrationConfig) -> Result<()> {
    if config.levels.is_empty() {
        return Err(RegistrationError::invalid_configuration(
            "At least one resolution level is required",
        ));
    }

    if !(config.epsilon.is_finite() && config.epsilon >= 0.0) {
        return Err(RegistrationError::invalid_configuration(
            format!("Epsilon must be non-negative, got {}", config.epsilon),
        ));
    }

    if config.target_padding.is_nan() || config.source_padding.is_nan() {
        return Err(RegistrationError::invalid_configuration("Padding values must not be NaN"));
    }

    for (index, level) in config.levels.iter().enumerate() {
        validate_level(index, level, config.similarity.uses_histogram())?;
    }
    Ok(())
}

/// Validate the weights of the image pairs of a run.
///
/// Weights must be finite and non-negative, and at least one positive.
pub fn validate_weights<I: IntoIterator<Item = f64>>(weights: I) -> Result<()> {
    let mut any_positive = false;
    for (index, weight) in weights.into_iter().enumerate() {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(RegistrationError::invalid_configuration(format!(
                "Weight of image pair {} must be non-negative, got {}",
                index, weight
            )));
        }
        any_positive |= weight > 0.0;
    }
    if !any_positive {
        return Err(RegistrationError::invalid_configuration(
            "At least one image pair needs a positive weight",
        ));
    }
    Ok(())
}

/// Check that an image can be shrunk by every factor of the configuration.
pub fn validate_image<B: Backend>(name: &str, image: &Image<B, 3>, config: &RegistrationConfig) -> Result<()> {
    let shape = image.shape();
    if shape.iter().any(|&n| n == 0) {
        return Err(RegistrationError::dimension_mismatch(format!(
            "{} image is empty: {:?}",
            name, shape
        )));
    }
    let geometry = image.geometry()?;
    for level in &config.levels {
        geometry.shrink([level.shrink_factor; 3])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimilarityMeasure;

    #[test]
    fn test_validate_iterations() {
        assert!(validate_iterations(100).is_ok());
        assert!(validate_iterations(0).is_err());
        assert!(validate_iterations(2_000_000).is_err());
    }

    #[test]
    fn test_validate_steps() {
        assert!(validate_steps(0.01, 1.0).is_ok());
        assert!(validate_steps(0.5, 0.5).is_ok());
        assert!(validate_steps(0.0, 1.0).is_err());
        assert!(validate_steps(1.0, 0.5).is_err());
        assert!(validate_steps(0.01, f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_histogram_params() {
        assert!(validate_histogram_params(64).is_ok());
        assert!(validate_histogram_params(1).is_err());
        assert!(validate_histogram_params(4096).is_err());
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&RegistrationConfig::default()).is_ok());
        assert!(validate_config(&RegistrationConfig::pyramid(3)).is_ok());

        let empty = RegistrationConfig::default().with_levels(Vec::new());
        assert!(validate_config(&empty).is_err());

        let negative_epsilon = RegistrationConfig::default().with_epsilon(-1.0);
        assert!(validate_config(&negative_epsilon).is_err());
    }

    #[test]
    fn test_validate_weights() {
        assert!(validate_weights([1.0]).is_ok());
        assert!(validate_weights([0.0, 2.5]).is_ok());
        assert!(validate_weights([]).is_err());
        assert!(validate_weights([0.0, 0.0]).is_err());
        assert!(validate_weights([1.0, -0.5]).is_err());
        assert!(validate_weights([f64::NAN]).is_err());
    }

    #[test]
    fn test_bins_only_checked_for_histogram_measures() {
        let level = LevelParameters::default().with_number_of_bins(1);
        let ssd = RegistrationConfig::default()
            .with_levels(vec![level])
            .with_similarity(SimilarityMeasure::Ssd);
        assert!(validate_config(&ssd).is_ok());

        let nmi = ssd.with_similarity(SimilarityMeasure::Nmi);
        let err = validate_config(&nmi).unwrap_err();
        assert!(err.to_string().contains("level 0"));
    }
}
