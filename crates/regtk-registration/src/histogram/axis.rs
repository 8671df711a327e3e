use serde::{Deserialize, Serialize};
use crate::error::{RegistrationError, Result};

/// Bin geometry along one histogram axis.
///
/// `width * nbins == max - min` always holds. Changing any of the four values
/// recomputes the dependent one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    min: f64,
    max: f64,
    width: f64,
    nbins: usize,
}

fn check_bins(nbins: usize) -> Result<()> {
    if nbins < 1 {
        return Err(RegistrationError::histogram("histogram must have at least one bin"));
    }
    Ok(())
}

fn check_range(min: f64, max: f64) -> Result<()> {
    if !(min.is_finite() && max.is_finite() && max > min) {
        return Err(RegistrationError::histogram(format!(
            "histogram range [{}, {}] is empty",
            min, max
        )));
    }
    Ok(())
}

impl BinAxis {
    /// `nbins` unit-width bins over `[0, nbins]`.
    pub fn unit(nbins: usize) -> Result<Self> {
        Self::with_bins(0.0, nbins as f64, nbins)
    }

    pub fn with_bins(min: f64, max: f64, nbins: usize) -> Result<Self> {
        check_bins(nbins)?;
        check_range(min, max)?;
        Ok(Self {
            min,
            max,
            width: (max - min) / nbins as f64,
            nbins,
        })
    }

    /// Bins of approximately `width`; the count is `round((max - min) / width)`.
    pub fn with_width(min: f64, max: f64, width: f64) -> Result<Self> {
        check_range(min, max)?;
        if !(width > 0.0) {
            return Err(RegistrationError::histogram(format!("bin width must be positive, got {}", width)));
        }
        let nbins = ((max - min) / width).round() as usize;
        Self::with_bins(min, max, nbins)
    }

    /// Restore an axis exactly as persisted.
    pub(crate) fn from_parts(min: f64, max: f64, width: f64, nbins: usize) -> Result<Self> {
        check_bins(nbins)?;
        check_range(min, max)?;
        Ok(Self { min, max, width, nbins })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn number_of_bins(&self) -> usize {
        self.nbins
    }

    pub fn put_min(&mut self, min: f64) -> Result<()> {
        *self = Self::with_bins(min, self.max, self.nbins)?;
        Ok(())
    }

    pub fn put_max(&mut self, max: f64) -> Result<()> {
        *self = Self::with_bins(self.min, max, self.nbins)?;
        Ok(())
    }

    pub fn put_width(&mut self, width: f64) -> Result<()> {
        *self = Self::with_width(self.min, self.max, width)?;
        Ok(())
    }

    pub fn put_number_of_bins(&mut self, nbins: usize) -> Result<()> {
        *self = Self::with_bins(self.min, self.max, nbins)?;
        Ok(())
    }

    /// Bin of a value: `round(nbins * (v - min - width/2) / (max - min))`
    /// clamped to the valid range. `None` outside `[min, max]`.
    #[inline]
    pub fn val_to_bin(&self, value: f64) -> Option<usize> {
        if !(value >= self.min && value <= self.max) {
            return None;
        }
        let index = (self.nbins as f64 * (value - self.min - 0.5 * self.width) / (self.max - self.min)).round();
        Some(index.clamp(0.0, (self.nbins - 1) as f64) as usize)
    }

    /// Centre of bin `index`.
    #[inline]
    pub fn bin_to_val(&self, index: usize) -> f64 {
        (index as f64 + 0.5) * self.width + self.min
    }
}
