//! Cubic B-spline Parzen window estimate of a joint intensity distribution.
//!
//! Target intensities are hard-binned. Each source intensity, given as a
//! continuous bin coordinate `u` (bin centres at integers), spreads its unit
//! mass over the four bins `floor(u) - 1 ..= floor(u) + 2` with cubic B-spline
//! weights; weights of bins past either end land in the edge bin, so every
//! sample keeps unit mass. The estimate is differentiable in `u`, which makes
//! the entropy derivatives used by the histogram-based gradients exact.

use rayon::prelude::*;
use regtk_core::transform::bspline::{basis, basis_derivative};

/// First supporting bin and the basis values and derivatives of a coordinate.
///
/// Coordinates outside `[0, nbins - 1]` are clamped and report a zero
/// derivative.
fn support(u: f64, nbins: usize) -> (isize, [f64; 4], [f64; 4]) {
    let last = (nbins - 1) as f64;
    let clamped = u.clamp(0.0, last);
    let floor = clamped.floor();
    let t = clamped - floor;
    let derivative = if u < 0.0 || u > last {
        [0.0; 4]
    } else {
        basis_derivative(t)
    };
    (floor as isize - 1, basis(t), derivative)
}

/// Bin receiving the weight of support position `first + m`.
fn folded(first: isize, m: usize, nbins: usize) -> usize {
    (first + m as isize).clamp(0, nbins as isize - 1) as usize
}

/// Parzen joint histogram of (hard target bin, soft source coordinate) samples.
#[derive(Debug, Clone)]
pub struct ParzenJointHistogram {
    target_bins: usize,
    source_bins: usize,
    /// Row-major by target bin: `joint[a * source_bins + b]`.
    joint: Vec<f64>,
    target: Vec<f64>,
    source: Vec<f64>,
    total: f64,
}

impl ParzenJointHistogram {
    /// Accumulate samples `(target bin, source coordinate)`.
    pub fn from_samples(samples: &[(usize, f64)], target_bins: usize, source_bins: usize) -> Self {
        let joint = samples
            .par_iter()
            .fold(
                || vec![0.0; target_bins * source_bins],
                |mut acc, &(a, u)| {
                    if a >= target_bins {
                        return acc;
                    }
                    let (first, weights, _) = support(u, source_bins);
                    for (m, w) in weights.iter().enumerate() {
                        acc[a * source_bins + folded(first, m, source_bins)] += w;
                    }
                    acc
                },
            )
            .reduce(
                || vec![0.0; target_bins * source_bins],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );

        let mut target = vec![0.0; target_bins];
        let mut source = vec![0.0; source_bins];
        for a in 0..target_bins {
            for b in 0..source_bins {
                let m = joint[a * source_bins + b];
                target[a] += m;
                source[b] += m;
            }
        }
        let total = target.iter().sum();

        Self {
            target_bins,
            source_bins,
            joint,
            target,
            source,
            total,
        }
    }

    /// Total accumulated mass.
    pub fn total(&self) -> f64 {
        self.total
    }

    fn entropy(&self, masses: &[f64]) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        -masses
            .iter()
            .filter(|&&m| m > 0.0)
            .map(|&m| {
                let p = m / self.total;
                p * p.ln()
            })
            .sum::<f64>()
    }

    pub fn target_entropy(&self) -> f64 {
        self.entropy(&self.target)
    }

    pub fn source_entropy(&self) -> f64 {
        self.entropy(&self.source)
    }

    pub fn joint_entropy(&self) -> f64 {
        self.entropy(&self.joint)
    }

    /// Derivatives of the source and joint entropies with respect to the
    /// source coordinate `u` of one sample in target bin `a`.
    ///
    /// Returns `(∂Hs/∂u, ∂Hxy/∂u)`.
    pub fn entropy_derivatives(&self, a: usize, u: f64) -> (f64, f64) {
        if self.total <= 0.0 || a >= self.target_bins {
            return (0.0, 0.0);
        }
        let (first, _, derivatives) = support(u, self.source_bins);
        let mut source = 0.0;
        let mut joint = 0.0;
        for (m, dw) in derivatives.iter().enumerate() {
            if *dw == 0.0 {
                continue;
            }
            let b = folded(first, m, self.source_bins);
            let ps = self.source[b] / self.total;
            let pj = self.joint[a * self.source_bins + b] / self.total;
            if ps > 0.0 {
                source -= (ps.ln() + 1.0) * dw;
            }
            if pj > 0.0 {
                joint -= (pj.ln() + 1.0) * dw;
            }
        }
        (source / self.total, joint / self.total)
    }
}
