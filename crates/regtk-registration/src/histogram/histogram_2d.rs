use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use crate::error::{RegistrationError, Result};
use super::{check_sample_count, entropy_of_counts, next_token, parse_tagged, BinAxis, Histogram1D, HISTOGRAM_2D_TAG};

/// Joint histogram of two variables with integer counts.
///
/// Bins are stored row-major with the y bin selecting the row and the x bin
/// the column, so `count(i, j)` reads row `j`, column `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    x: BinAxis,
    y: BinAxis,
    nsamp: u64,
    bins: Vec<u64>,
}

impl Histogram2D {
    /// Unit bins over `[0, nbins_x] × [0, nbins_y]`.
    pub fn new(nbins_x: usize, nbins_y: usize) -> Result<Self> {
        Ok(Self::from_axes(BinAxis::unit(nbins_x)?, BinAxis::unit(nbins_y)?))
    }

    pub fn with_range(
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        nbins_x: usize,
        nbins_y: usize,
    ) -> Result<Self> {
        Ok(Self::from_axes(
            BinAxis::with_bins(min_x, max_x, nbins_x)?,
            BinAxis::with_bins(min_y, max_y, nbins_y)?,
        ))
    }

    pub fn with_width(
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        width_x: f64,
        width_y: f64,
    ) -> Result<Self> {
        Ok(Self::from_axes(
            BinAxis::with_width(min_x, max_x, width_x)?,
            BinAxis::with_width(min_y, max_y, width_y)?,
        ))
    }

    pub fn from_axes(x: BinAxis, y: BinAxis) -> Self {
        Self {
            bins: vec![0; x.number_of_bins() * y.number_of_bins()],
            x,
            y,
            nsamp: 0,
        }
    }

    /// Histogram with the same geometry and no samples.
    pub fn empty_like(&self) -> Self {
        Self::from_axes(self.x, self.y)
    }

    pub fn axis_x(&self) -> &BinAxis {
        &self.x
    }

    pub fn axis_y(&self) -> &BinAxis {
        &self.y
    }

    pub fn min(&self) -> (f64, f64) {
        (self.x.min(), self.y.min())
    }

    pub fn max(&self) -> (f64, f64) {
        (self.x.max(), self.y.max())
    }

    pub fn width(&self) -> (f64, f64) {
        (self.x.width(), self.y.width())
    }

    pub fn number_of_bins(&self) -> (usize, usize) {
        (self.x.number_of_bins(), self.y.number_of_bins())
    }

    pub fn number_of_samples(&self) -> u64 {
        self.nsamp
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> usize {
        j * self.x.number_of_bins() + i
    }

    /// Count in x bin `i`, y bin `j`.
    pub fn count(&self, i: usize, j: usize) -> u64 {
        self.bins[self.offset(i, j)]
    }

    fn rebuild(&mut self, x: BinAxis, y: BinAxis) {
        *self = Self::from_axes(x, y);
    }

    pub fn put_min(&mut self, min_x: f64, min_y: f64) -> Result<()> {
        let (mut x, mut y) = (self.x, self.y);
        x.put_min(min_x)?;
        y.put_min(min_y)?;
        self.rebuild(x, y);
        Ok(())
    }

    pub fn put_max(&mut self, max_x: f64, max_y: f64) -> Result<()> {
        let (mut x, mut y) = (self.x, self.y);
        x.put_max(max_x)?;
        y.put_max(max_y)?;
        self.rebuild(x, y);
        Ok(())
    }

    pub fn put_width(&mut self, width_x: f64, width_y: f64) -> Result<()> {
        let (mut x, mut y) = (self.x, self.y);
        x.put_width(width_x)?;
        y.put_width(width_y)?;
        self.rebuild(x, y);
        Ok(())
    }

    pub fn put_number_of_bins(&mut self, nbins_x: usize, nbins_y: usize) -> Result<()> {
        let (mut x, mut y) = (self.x, self.y);
        x.put_number_of_bins(nbins_x)?;
        y.put_number_of_bins(nbins_y)?;
        self.rebuild(x, y);
        Ok(())
    }

    /// Zero all counts.
    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.nsamp = 0;
    }

    /// Take the geometry and counts of `other`.
    pub fn reset_from(&mut self, other: &Histogram2D) {
        self.clone_from(other);
    }

    /// Add the counts of a histogram with identical geometry.
    pub fn merge(&mut self, other: &Histogram2D) -> Result<()> {
        if self.x != other.x || self.y != other.y {
            return Err(RegistrationError::histogram("cannot merge histograms with different bin geometry"));
        }
        for (a, b) in self.bins.iter_mut().zip(&other.bins) {
            *a += b;
        }
        self.nsamp += other.nsamp;
        Ok(())
    }

    pub fn val_to_bin_x(&self, value: f64) -> Option<usize> {
        self.x.val_to_bin(value)
    }

    pub fn val_to_bin_y(&self, value: f64) -> Option<usize> {
        self.y.val_to_bin(value)
    }

    pub fn bin_to_val_x(&self, i: usize) -> f64 {
        self.x.bin_to_val(i)
    }

    pub fn bin_to_val_y(&self, j: usize) -> f64 {
        self.y.bin_to_val(j)
    }

    /// Add `count` samples to bin `(i, j)`.
    pub fn add(&mut self, i: usize, j: usize, count: u64) {
        let offset = self.offset(i, j);
        self.bins[offset] += count;
        self.nsamp += count;
    }

    /// Remove up to `count` samples from bin `(i, j)`.
    pub fn delete(&mut self, i: usize, j: usize, count: u64) {
        let offset = self.offset(i, j);
        let removed = count.min(self.bins[offset]);
        self.bins[offset] -= removed;
        self.nsamp -= removed;
    }

    /// Add one sample; dropped when either value is outside its range.
    #[inline]
    pub fn add_sample(&mut self, x: f64, y: f64) {
        if let (Some(i), Some(j)) = (self.x.val_to_bin(x), self.y.val_to_bin(y)) {
            self.add(i, j, 1);
        }
    }

    pub fn del_sample(&mut self, x: f64, y: f64) {
        if let (Some(i), Some(j)) = (self.x.val_to_bin(x), self.y.val_to_bin(y)) {
            self.delete(i, j, 1);
        }
    }

    fn is_empty_warn(&self, statistic: &str) -> bool {
        if self.nsamp == 0 {
            tracing::warn!("Histogram2D::{}: histogram is empty", statistic);
            return true;
        }
        false
    }

    fn column_sum(&self, i: usize) -> u64 {
        (0..self.y.number_of_bins()).map(|j| self.count(i, j)).sum()
    }

    fn row_sum(&self, j: usize) -> u64 {
        let n = self.x.number_of_bins();
        self.bins[j * n..(j + 1) * n].iter().sum()
    }

    /// Joint probability of bin `(i, j)`.
    pub fn joint_probability(&self, i: usize, j: usize) -> f64 {
        if self.is_empty_warn("joint_probability") {
            return 0.0;
        }
        self.count(i, j) as f64 / self.nsamp as f64
    }

    /// Marginal probability of x bin `i`.
    pub fn marginal_probability_x(&self, i: usize) -> f64 {
        if self.is_empty_warn("marginal_probability_x") {
            return 0.0;
        }
        self.column_sum(i) as f64 / self.nsamp as f64
    }

    /// Marginal probability of y bin `j`.
    pub fn marginal_probability_y(&self, j: usize) -> f64 {
        if self.is_empty_warn("marginal_probability_y") {
            return 0.0;
        }
        self.row_sum(j) as f64 / self.nsamp as f64
    }

    /// Mean of x over samples in y bin `j`; 0 for an empty row.
    pub fn conditional_mean_x(&self, j: usize) -> f64 {
        let total = self.row_sum(j);
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = (0..self.x.number_of_bins())
            .map(|i| self.count(i, j) as f64 * self.bin_to_val_x(i))
            .sum();
        sum / total as f64
    }

    /// Mean of y over samples in x bin `i`; 0 for an empty column.
    pub fn conditional_mean_y(&self, i: usize) -> f64 {
        let total = self.column_sum(i);
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = (0..self.y.number_of_bins())
            .map(|j| self.count(i, j) as f64 * self.bin_to_val_y(j))
            .sum();
        sum / total as f64
    }

    /// Marginal histogram of x with the x bin geometry.
    pub fn histogram_x(&self) -> Histogram1D {
        let mut h = Histogram1D::from_axis(self.x);
        for i in 0..self.x.number_of_bins() {
            h.add(i, self.column_sum(i));
        }
        h
    }

    /// Marginal histogram of y with the y bin geometry.
    pub fn histogram_y(&self) -> Histogram1D {
        let mut h = Histogram1D::from_axis(self.y);
        for j in 0..self.y.number_of_bins() {
            h.add(j, self.row_sum(j));
        }
        h
    }

    pub fn mean_x(&self) -> f64 {
        if self.is_empty_warn("mean_x") {
            return 0.0;
        }
        self.histogram_x().mean()
    }

    pub fn mean_y(&self) -> f64 {
        if self.is_empty_warn("mean_y") {
            return 0.0;
        }
        self.histogram_y().mean()
    }

    /// `Σ p(i) x_i² − mean_x²`.
    pub fn variance_x(&self) -> f64 {
        if self.is_empty_warn("variance_x") {
            return 0.0;
        }
        let second: f64 = (0..self.x.number_of_bins())
            .map(|i| {
                let v = self.bin_to_val_x(i);
                self.column_sum(i) as f64 * v * v
            })
            .sum::<f64>()
            / self.nsamp as f64;
        let mean = self.mean_x();
        second - mean * mean
    }

    /// `Σ p(j) y_j² − mean_y²`.
    pub fn variance_y(&self) -> f64 {
        if self.is_empty_warn("variance_y") {
            return 0.0;
        }
        let second: f64 = (0..self.y.number_of_bins())
            .map(|j| {
                let v = self.bin_to_val_y(j);
                self.row_sum(j) as f64 * v * v
            })
            .sum::<f64>()
            / self.nsamp as f64;
        let mean = self.mean_y();
        second - mean * mean
    }

    pub fn standard_deviation_x(&self) -> f64 {
        self.variance_x().max(0.0).sqrt()
    }

    pub fn standard_deviation_y(&self) -> f64 {
        self.variance_y().max(0.0).sqrt()
    }

    pub fn covariance(&self) -> f64 {
        if self.is_empty_warn("covariance") {
            return 0.0;
        }
        let (mx, my) = (self.mean_x(), self.mean_y());
        let (nx, ny) = self.number_of_bins();
        let mut sum = 0.0;
        for j in 0..ny {
            let dy = self.bin_to_val_y(j) - my;
            for i in 0..nx {
                let c = self.count(i, j);
                if c > 0 {
                    sum += c as f64 * (self.bin_to_val_x(i) - mx) * dy;
                }
            }
        }
        sum / self.nsamp as f64
    }

    pub fn entropy_x(&self) -> f64 {
        if self.is_empty_warn("entropy_x") {
            return 0.0;
        }
        entropy_of_counts((0..self.x.number_of_bins()).map(|i| self.column_sum(i)), self.nsamp)
    }

    pub fn entropy_y(&self) -> f64 {
        if self.is_empty_warn("entropy_y") {
            return 0.0;
        }
        entropy_of_counts((0..self.y.number_of_bins()).map(|j| self.row_sum(j)), self.nsamp)
    }

    pub fn joint_entropy(&self) -> f64 {
        if self.is_empty_warn("joint_entropy") {
            return 0.0;
        }
        entropy_of_counts(self.bins.iter().copied(), self.nsamp)
    }

    /// `Hx + Hy − Hxy`.
    pub fn mutual_information(&self) -> f64 {
        if self.is_empty_warn("mutual_information") {
            return 0.0;
        }
        self.entropy_x() + self.entropy_y() - self.joint_entropy()
    }

    /// `(Hx + Hy) / Hxy`.
    ///
    /// When every sample falls in one bin the joint entropy is zero and both
    /// variables are fully predictable; this returns the maximum value 2.
    pub fn normalized_mutual_information(&self) -> f64 {
        if self.is_empty_warn("normalized_mutual_information") {
            return 0.0;
        }
        let hxy = self.joint_entropy();
        if hxy <= f64::EPSILON {
            return 2.0;
        }
        (self.entropy_x() + self.entropy_y()) / hxy
    }

    /// Correlation ratio of X given Y: `Var(E[X|Y]) / Var(X)`.
    pub fn correlation_ratio_xy(&self) -> f64 {
        if self.is_empty_warn("correlation_ratio_xy") {
            return 0.0;
        }
        let variance = self.variance_x();
        if variance <= 0.0 {
            return 0.0;
        }
        let mean = self.mean_x();
        let between: f64 = (0..self.y.number_of_bins())
            .map(|j| {
                let d = self.conditional_mean_x(j) - mean;
                self.row_sum(j) as f64 * d * d
            })
            .sum();
        between / (self.nsamp as f64 * variance)
    }

    /// Correlation ratio of Y given X: `Var(E[Y|X]) / Var(Y)`.
    pub fn correlation_ratio_yx(&self) -> f64 {
        if self.is_empty_warn("correlation_ratio_yx") {
            return 0.0;
        }
        let variance = self.variance_y();
        if variance <= 0.0 {
            return 0.0;
        }
        let mean = self.mean_y();
        let between: f64 = (0..self.x.number_of_bins())
            .map(|i| {
                let d = self.conditional_mean_y(i) - mean;
                self.column_sum(i) as f64 * d * d
            })
            .sum();
        between / (self.nsamp as f64 * variance)
    }

    /// `|Cov| / (σx σy)`; 0 when either variable is constant.
    pub fn cross_correlation(&self) -> f64 {
        if self.is_empty_warn("cross_correlation") {
            return 0.0;
        }
        let denominator = self.standard_deviation_x() * self.standard_deviation_y();
        if denominator <= 0.0 {
            return 0.0;
        }
        self.covariance().abs() / denominator
    }

    /// `Σ c(i, j) (x_i − y_j)²` over bin centres.
    pub fn sums_of_squared_differences(&self) -> f64 {
        if self.is_empty_warn("sums_of_squared_differences") {
            return 0.0;
        }
        let (nx, ny) = self.number_of_bins();
        let mut sum = 0.0;
        for j in 0..ny {
            let y = self.bin_to_val_y(j);
            for i in 0..nx {
                let c = self.count(i, j);
                if c > 0 {
                    let d = self.bin_to_val_x(i) - y;
                    sum += c as f64 * d * d;
                }
            }
        }
        sum
    }

    fn require_square(&self, statistic: &str) -> Result<()> {
        let (nx, ny) = self.number_of_bins();
        if nx != ny {
            return Err(RegistrationError::histogram(format!(
                "{} needs equal bin counts, got {} x {}",
                statistic, nx, ny
            )));
        }
        Ok(())
    }

    /// Fraction of samples on the diagonal.
    pub fn label_consistency(&self) -> Result<f64> {
        self.require_square("label_consistency")?;
        if self.is_empty_warn("label_consistency") {
            return Ok(0.0);
        }
        let diagonal: u64 = (0..self.x.number_of_bins()).map(|i| self.count(i, i)).sum();
        Ok(diagonal as f64 / self.nsamp as f64)
    }

    /// Cohen's kappa, `(po − pe) / (1 − pe)`.
    ///
    /// When chance agreement is total (`pe == 1`), agreement is perfect and
    /// kappa is 1.
    pub fn kappa(&self) -> Result<f64> {
        self.require_square("kappa")?;
        if self.is_empty_warn("kappa") {
            return Ok(0.0);
        }
        let n = self.x.number_of_bins();
        let total = self.nsamp as f64;
        let mut po = 0.0;
        let mut pe = 0.0;
        for k in 0..n {
            po += self.count(k, k) as f64;
            pe += self.column_sum(k) as f64 * self.row_sum(k) as f64;
        }
        po /= total;
        pe /= total * total;
        if (1.0 - pe).abs() <= f64::EPSILON {
            return Ok(1.0);
        }
        Ok((po - pe) / (1.0 - pe))
    }

    /// Write the text representation.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let (nx, ny) = self.number_of_bins();
        writeln!(writer, "{}", HISTOGRAM_2D_TAG)?;
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {}",
            nx,
            ny,
            self.nsamp,
            self.x.min(),
            self.x.max(),
            self.y.min(),
            self.y.max(),
            self.x.width(),
            self.y.width()
        )?;
        for j in 0..ny {
            let row: Vec<String> = self.bins[j * nx..(j + 1) * nx].iter().map(u64::to_string).collect();
            writeln!(writer, "{}", row.join(" "))?;
        }
        Ok(())
    }

    /// Read the text representation.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let mut tokens = parse_tagged(&text, HISTOGRAM_2D_TAG)?;

        let nx: usize = next_token(&mut tokens, "x bin count")?;
        let ny: usize = next_token(&mut tokens, "y bin count")?;
        let nsamp: u64 = next_token(&mut tokens, "sample count")?;
        let min_x: f64 = next_token(&mut tokens, "min x")?;
        let max_x: f64 = next_token(&mut tokens, "max x")?;
        let min_y: f64 = next_token(&mut tokens, "min y")?;
        let max_y: f64 = next_token(&mut tokens, "max y")?;
        let width_x: f64 = next_token(&mut tokens, "width x")?;
        let width_y: f64 = next_token(&mut tokens, "width y")?;
        if nx.checked_mul(ny).map_or(true, |n| n > text.len()) {
            return Err(RegistrationError::histogram(format!(
                "{}x{} bins cannot fit in the input",
                nx, ny
            )));
        }

        let mut histogram = Self::from_axes(
            BinAxis::from_parts(min_x, max_x, width_x, nx)?,
            BinAxis::from_parts(min_y, max_y, width_y, ny)?,
        );
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

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read(&mut BufReader::new(File::open(path)?))
    }
}
