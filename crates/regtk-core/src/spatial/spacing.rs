//! Voxel spacing.

use super::Vector;

/// Physical distance between adjacent voxels along each axis.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Spacing<D> {
    /// Same spacing on every axis.
    pub fn uniform(value: f64) -> Self {
        Self::new([value; D])
    }

    /// Spacing scaled per axis by integer shrink factors.
    pub fn scaled(&self, factors: [usize; D]) -> Self {
        Self::new(std::array::from_fn(|i| self[i] * factors[i] as f64))
    }

    pub fn min_spacing(&self) -> f64 {
        (0..D).map(|i| self[i]).fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spacing_scaled() {
        let s = Spacing::<3>::new([1.0, 2.0, 0.5]);
        assert_eq!(s.scaled([2, 2, 4]), Spacing::new([2.0, 4.0, 2.0]));
        assert_eq!(s.min_spacing(), 0.5);
        assert_eq!(Spacing::<3>::uniform(1.5), Spacing::new([1.5, 1.5, 1.5]));
    }
}
