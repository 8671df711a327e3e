//! Bin accumulators and their statistics.
//!
//! Counts are non-negative integers. Samples outside `[min, max]` are dropped
//! silently. Statistics of an empty histogram log a warning and return 0.

pub mod axis;
pub mod histogram_1d;
pub mod histogram_2d;

pub use axis::BinAxis;
pub use histogram_1d::Histogram1D;
pub use histogram_2d::Histogram2D;

/// Tag line of the 1D text format.
pub const HISTOGRAM_1D_TAG: &str = "irtkHistogram_1D";
/// Tag line of the 2D text format.
pub const HISTOGRAM_2D_TAG: &str = "irtkHistogram_2D";

/// `-Σ c ln c / N + ln N` over non-zero counts.
pub(crate) fn entropy_of_counts<I: IntoIterator<Item = u64>>(counts: I, total: u64) -> f64 {
    let n = total as f64;
    let sum: f64 = counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let c = c as f64;
            c * c.ln()
        })
        .sum();
    -sum / n + n.ln()
}

/// Read files must carry a sample count equal to the bin total.
pub(crate) fn check_sample_count(nsamp: u64, bins: &[u64]) -> crate::Result<()> {
    let total = bins
        .iter()
        .try_fold(0u64, |sum, &c| sum.checked_add(c))
        .ok_or_else(|| crate::RegistrationError::histogram("bin counts overflow"))?;
    if total != nsamp {
        return Err(crate::RegistrationError::histogram(format!(
            "sample count {} does not match the bin total {}",
            nsamp, total
        )));
    }
    Ok(())
}

/// Whitespace-separated tokens following a tag line.
pub(crate) fn parse_tagged<'a>(text: &'a str, tag: &str) -> crate::Result<std::str::SplitWhitespace<'a>> {
    let mut lines = text.splitn(2, '\n');
    let first = lines.next().unwrap_or_default().trim();
    if first != tag {
        return Err(crate::RegistrationError::histogram(format!(
            "expected tag {:?}, found {:?}",
            tag, first
        )));
    }
    Ok(lines.next().unwrap_or_default().split_whitespace())
}

/// Next token parsed as `T`.
pub(crate) fn next_token<T: std::str::FromStr>(
    tokens: &mut std::str::SplitWhitespace<'_>,
    what: &str,
) -> crate::Result<T> {
    let token = tokens
        .next()
        .ok_or_else(|| crate::RegistrationError::histogram(format!("missing {}", what)))?;
    token
        .parse::<T>()
        .map_err(|_| crate::RegistrationError::histogram(format!("invalid {}: {:?}", what, token)))
}
