use std::io::{Read, Write};
use crate::error::{RegistrationError, Result};
use super::{check_sample_count, entropy_of_counts, next_token, parse_tagged, BinAxis, HISTOGRAM_1D_TAG};

/// One-dimensional histogram with integer counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    axis: BinAxis,
    nsamp: u64,
    bins: Vec<u64>,
}

impl Histogram1D {
    /// `nbins` unit bins over `[0, nbins]`.
    pub fn new(nbins: usize) -> Result<Self> {
        Ok(Self::from_axis(BinAxis::unit(nbins)?))
    }

    /// `nbins` equal bins over `[min, max]`.
    pub fn with_range(min: f64, max: f64, nbins: usize) -> Result<Self> {
        Ok(Self::from_axis(BinAxis::with_bins(min, max, nbins)?))
    }

    /// Bins of approximately `width` over `[min, max]`.
    pub fn with_width(min: f64, max: f64, width: f64) -> Result<Self> {
        Ok(Self::from_axis(BinAxis::with_width(min, max, width)?))
    }

    pub(crate) fn from_axis(axis: BinAxis) -> Self {
        Self {
            bins: vec![0; axis.number_of_bins()],
            axis,
            nsamp: 0,
        }
    }

    pub fn axis(&self) -> &BinAxis {
        &self.axis
    }

    pub fn min(&self) -> f64 {
        self.axis.min()
    }

    pub fn max(&self) -> f64 {
        self.axis.max()
    }

    pub fn width(&self) -> f64 {
        self.axis.width()
    }

    pub fn number_of_bins(&self) -> usize {
        self.axis.number_of_bins()
    }

    pub fn number_of_samples(&self) -> u64 {
        self.nsamp
    }

    pub fn count(&self, bin: usize) -> u64 {
        self.bins[bin]
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    fn rebuild(&mut self, axis: BinAxis) {
        *self = Self::from_axis(axis);
    }

    pub fn put_min(&mut self, min: f64) -> Result<()> {
        let mut axis = self.axis;
        axis.put_min(min)?;
        self.rebuild(axis);
        Ok(())
    }

    pub fn put_max(&mut self, max: f64) -> Result<()> {
        let mut axis = self.axis;
        axis.put_max(max)?;
        self.rebuild(axis);
        Ok(())
    }

    pub fn put_width(&mut self, width: f64) -> Result<()> {
        let mut axis = self.axis;
        axis.put_width(width)?;
        self.rebuild(axis);
        Ok(())
    }

    pub fn put_number_of_bins(&mut self, nbins: usize) -> Result<()> {
        let mut axis = self.axis;
        axis.put_number_of_bins(nbins)?;
        self.rebuild(axis);
        Ok(())
    }

    /// Zero all counts.
    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.nsamp = 0;
    }

    pub fn val_to_bin(&self, value: f64) -> Option<usize> {
        self.axis.val_to_bin(value)
    }

    pub fn bin_to_val(&self, bin: usize) -> f64 {
        self.axis.bin_to_val(bin)
    }

    /// Add `count` samples to `bin`.
    pub fn add(&mut self, bin: usize, count: u64) {
        self.bins[bin] += count;
        self.nsamp += count;
    }

    /// Remove up to `count` samples from `bin`.
    pub fn delete(&mut self, bin: usize, count: u64) {
        let removed = count.min(self.bins[bin]);
        self.bins[bin] -= removed;
        self.nsamp -= removed;
    }

    pub fn add_sample(&mut self, value: f64) {
        if let Some(bin) = self.val_to_bin(value) {
            self.add(bin, 1);
        }
    }

    pub fn del_sample(&mut self, value: f64) {
        if let Some(bin) = self.val_to_bin(value) {
            self.delete(bin, 1);
        }
    }

    fn is_empty_warn(&self, statistic: &str) -> bool {
        if self.nsamp == 0 {
            tracing::warn!("Histogram1D::{}: histogram is empty", statistic);
            return true;
        }
        false
    }

    /// Probability of `bin`.
    pub fn bin_to_pdf(&self, bin: usize) -> f64 {
        if self.is_empty_warn("bin_to_pdf") {
            return 0.0;
        }
        self.bins[bin] as f64 / self.nsamp as f64
    }

    /// Probability of the bin containing `value`; 0 outside the range.
    pub fn val_to_pdf(&self, value: f64) -> f64 {
        self.val_to_bin(value).map_or(0.0, |bin| self.bin_to_pdf(bin))
    }

    /// Fraction of samples in bins up to and including the bin of `value`.
    pub fn val_to_cdf(&self, value: f64) -> f64 {
        if self.is_empty_warn("val_to_cdf") {
            return 0.0;
        }
        if value < self.min() {
            return 0.0;
        }
        let last = self.val_to_bin(value).unwrap_or(self.number_of_bins() - 1);
        let below: u64 = self.bins[..=last].iter().sum();
        below as f64 / self.nsamp as f64
    }

    /// Centre of the first bin whose cumulative probability reaches `p`.
    pub fn cdf_to_val(&self, p: f64) -> f64 {
        if self.is_empty_warn("cdf_to_val") {
            return 0.0;
        }
        let target = p.clamp(0.0, 1.0) * self.nsamp as f64;
        let mut cumulative = 0u64;
        for (bin, &c) in self.bins.iter().enumerate() {
            cumulative += c;
            if cumulative as f64 >= target && cumulative > 0 {
                return self.bin_to_val(bin);
            }
        }
        self.bin_to_val(self.number_of_bins() - 1)
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty_warn("mean") {
            return 0.0;
        }
        let sum: f64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, &c)| c as f64 * self.bin_to_val(i))
            .sum();
        sum / self.nsamp as f64
    }

    pub fn variance(&self) -> f64 {
        if self.is_empty_warn("variance") {
            return 0.0;
        }
        let mean = self.mean();
        let sum: f64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let d = self.bin_to_val(i) - mean;
                c as f64 * d * d
            })
            .sum();
        sum / self.nsamp as f64
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn entropy(&self) -> f64 {
        if self.is_empty_warn("entropy") {
            return 0.0;
        }
        entropy_of_counts(self.bins.iter().copied(), self.nsamp)
    }

    /// Smooth with a 1-2-1 kernel.
    ///
    /// Edge bins reflect the missing neighbour so the total is preserved.
    /// Fractional results are rounded by largest remainder, keeping the
    /// sample count exact.
    pub fn smooth(&mut self) {
        let n = self.bins.len();
        if n < 2 || self.nsamp == 0 {
            return;
        }
        let smoothed: Vec<f64> = (0..n)
            .map(|i| {
                let left = if i > 0 { self.bins[i - 1] } else { self.bins[i] };
                let right = if i + 1 < n { self.bins[i + 1] } else { self.bins[i] };
                (left as f64 + 2.0 * self.bins[i] as f64 + right as f64) / 4.0
            })
            .collect();

        let mut rounded: Vec<u64> = smoothed.iter().map(|v| v.floor() as u64).collect();
        let assigned: u64 = rounded.iter().sum();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let ra = smoothed[a] - smoothed[a].floor();
            let rb = smoothed[b] - smoothed[b].floor();
            rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
        });
        for &i in order.iter().take(self.nsamp.saturating_sub(assigned) as usize) {
            rounded[i] += 1;
        }
        self.bins = rounded;
    }

    /// Write the text representation.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "{}", HISTOGRAM_1D_TAG)?;
        writeln!(
            writer,
            "{} {} {} {} {}",
            self.number_of_bins(),
            self.nsamp,
            self.min(),
            self.max(),
            self.width()
        )?;
        let counts: Vec<String> = self.bins.iter().map(u64::to_string).collect();
        writeln!(writer, "{}", counts.join(" "))?;
        Ok(())
    }

    /// Read the text representation.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let mut tokens = parse_tagged(&text, HISTOGRAM_1D_TAG)?;

        let nbins: usize = next_token(&mut tokens, "bin count")?;
        let nsamp: u64 = next_token(&mut tokens, "sample count")?;
        let min: f64 = next_token(&mut tokens, "min")?;
        let max: f64 = next_token(&mut tokens, "max")?;
        let width: f64 = next_token(&mut tokens, "width")?;
        if nbins > text.len() {
            return Err(RegistrationError::histogram(format!("{} bins cannot fit in the input", nbins)));
        }

        let mut histogram = Self::from_axis(BinAxis::from_parts(min, max, width, nbins)?);
        for bin in histogram.bins.iter_mut() {
            *bin = next_token(&mut tokens, "bin count")?;
        }
        if tokens.next().is_some() {
            return Err(RegistrationError::histogram("trailing data after bins"));
        }
        check_sample_count(nsamp, &histogram.bins)?;
        histogram.nsamp = nsamp;
        Ok(histogram)
    }
}
