use crate::float_trait::StainFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use num_traits::Float;

/// Default number of bins for a bare angle histogram.
pub const DEFAULT_ANGLE_BINS: usize = 128;

/// Components closer to zero than this make `atan2` meaningless.
const UNDEFINED_ANGLE_TOLERANCE: f64 = 1e-6;

/// Uniform histogram over a half-open angular range `[lo, hi)`.
///
/// The bin mapping is strictly linear, `bin = (angle - lo) / width`, so that
/// [`AngleHistogram::bin_to_angle`] undoes [`AngleHistogram::angle_to_bin`]
/// exactly up to rounding. Fractional bins are meaningful: bin `b` covers
/// `[b, b + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AngleHistogram<F: StainFloat> {
    nbins: usize,
    range: [F; 2],
}

impl<F: StainFloat> Default for AngleHistogram<F> {
    fn default() -> Self {
        Self::new(DEFAULT_ANGLE_BINS)
    }
}

impl<F: StainFloat> AngleHistogram<F> {
    /// Histogram over `[-pi, pi)`.
    pub fn new(nbins: usize) -> Self {
        Self::with_range(nbins, [-F::PI(), F::PI()])
    }

    pub fn with_range(nbins: usize, range: [F; 2]) -> Self {
        Self { nbins, range }
    }

    pub fn num_bins(&self) -> usize {
        self.nbins
    }

    pub fn set_num_bins(&mut self, nbins: usize) {
        self.nbins = nbins;
    }

    pub fn range(&self) -> [F; 2] {
        self.range
    }

    pub fn set_range(&mut self, range: [F; 2]) {
        self.range = range;
    }

    /// Value returned for unmappable bins/angles and undefined vector angles.
    pub fn sentinel() -> F {
        F::max_value()
    }

    fn is_valid(&self) -> bool {
        self.nbins >= 1 && self.range[1] > self.range[0]
    }

    fn bin_width(&self) -> F {
        (self.range[1] - self.range[0]) / F::of(self.nbins as f64)
    }

    /// Count `values` into the configured bins.
    ///
    /// Returns an empty array when the input is empty, there are no bins, or
    /// the range is inverted. Values outside `[lo, hi)` (including the
    /// undefined-angle sentinel and NaN) are not counted.
    pub fn fill(&self, values: ArrayView1<F>) -> Array1<u64> {
        if values.is_empty() || !self.is_valid() {
            return Array1::zeros(0);
        }
        let [lo, hi] = self.range;
        let width = self.bin_width();
        let mut hist = Array1::<u64>::zeros(self.nbins);
        for &v in values.iter() {
            if !(v >= lo && v < hi) {
                continue;
            }
            let b = Float::floor((v - lo) / width).to_usize().unwrap_or(0);
            hist[b.min(self.nbins - 1)] += 1;
        }
        hist
    }

    /// Fractional bin position of `angle`, or the sentinel when unconfigured.
    pub fn angle_to_bin(&self, angle: F) -> F {
        if !self.is_valid() {
            return Self::sentinel();
        }
        (angle - self.range[0]) / self.bin_width()
    }

    /// Angle at fractional bin position `bin`, or the sentinel when unconfigured.
    pub fn bin_to_angle(&self, bin: F) -> F {
        if !self.is_valid() {
            return Self::sentinel();
        }
        self.range[0] + self.bin_width() * bin
    }

    /// Angles of 2D row vectors with `atan2(y, x)`, canonical range `[-pi, pi)`.
    ///
    /// Rows whose components are both within a small tolerance of zero map
    /// to [`AngleHistogram::sentinel`]. Fewer than two columns gives an
    /// empty result.
    pub fn vectors_to_angles(&self, vectors: ArrayView2<F>) -> Array1<F> {
        if vectors.is_empty() || vectors.ncols() < 2 {
            return Array1::zeros(0);
        }
        let tol = F::of(UNDEFINED_ANGLE_TOLERANCE);
        vectors
            .rows()
            .into_iter()
            .map(|row| {
                let (x, y) = (row[0], row[1]);
                if Float::abs(x) < tol && Float::abs(y) < tol {
                    Self::sentinel()
                } else {
                    let a = Float::atan2(y, x);
                    // atan2 can return +pi exactly; fold onto the half-open range
                    if a >= F::PI() {
                        a - F::TAU()
                    } else {
                        a
                    }
                }
            })
            .collect()
    }

    /// Unit vectors `(cos, sin)` for each angle, one row per angle.
    ///
    /// An input consisting only of zeros is rejected with an empty result.
    pub fn angles_to_vectors(&self, angles: ArrayView1<F>) -> Array2<F> {
        if angles.is_empty() || angles.iter().all(|&a| a == F::zero()) {
            return Array2::zeros((0, 2));
        }
        let mut out = Array2::zeros((angles.len(), 2));
        for (mut row, &a) in out.rows_mut().into_iter().zip(angles.iter()) {
            row[0] = Float::cos(a);
            row[1] = Float::sin(a);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};
    use std::f64::consts::PI;

    #[test]
    fn test_bin_round_trip() {
        let h = AngleHistogram::<f64>::new(128);
        for b in 0..128 {
            let angle = h.bin_to_angle(b as f64);
            let back = h.angle_to_bin(angle);
            assert!((back - b as f64).abs() < 1.0, "bin {b} came back as {back}");
        }
        assert_abs_diff_eq!(h.bin_to_angle(0.0), -PI, epsilon = 1e-12);
        assert_abs_diff_eq!(h.bin_to_angle(128.0), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_configuration_sentinels() {
        let h = AngleHistogram::<f64>::new(0);
        assert_eq!(h.angle_to_bin(0.3), f64::MAX);
        assert_eq!(h.bin_to_angle(3.0), f64::MAX);

        let h = AngleHistogram::<f64>::with_range(16, [1.0, -1.0]);
        assert_eq!(h.angle_to_bin(0.3), f64::MAX);
    }

    #[test]
    fn test_fill_mass_and_rejections() {
        let values = array![-3.0_f64, -1.0, 0.0, 0.5, 3.1, f64::MAX];
        let h = AngleHistogram::<f64>::new(64);
        let hist = h.fill(values.view());
        assert_eq!(hist.len(), 64);
        assert_eq!(hist.sum(), 5);

        assert!(AngleHistogram::<f64>::new(0).fill(values.view()).is_empty());
        assert!(AngleHistogram::<f64>::with_range(8, [PI, -PI])
            .fill(values.view())
            .is_empty());
        assert!(h.fill(Array1::<f64>::zeros(0).view()).is_empty());
    }

    #[test]
    fn test_fill_bins_are_linear() {
        let h = AngleHistogram::<f64>::with_range(4, [0.0, 4.0]);
        let hist = h.fill(array![0.0, 0.99, 1.0, 2.5, 3.999, 4.0].view());
        assert_eq!(hist.to_vec(), vec![2, 1, 1, 1]);
    }

    #[test]
    fn test_vectors_to_angles() {
        let h = AngleHistogram::<f64>::default();
        let v = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0], [-1.0, 0.0], [1e-8, -1e-8]];
        let a = h.vectors_to_angles(v.view());
        assert_abs_diff_eq!(a[0], 0.0);
        assert_abs_diff_eq!(a[1], PI / 2.0);
        assert_eq!(a[2], f64::MAX);
        assert_abs_diff_eq!(a[3], -PI);
        assert_eq!(a[4], f64::MAX);

        assert!(h.vectors_to_angles(array![[1.0], [2.0]].view()).is_empty());
    }

    #[test]
    fn test_angles_to_vectors() {
        let h = AngleHistogram::<f64>::default();
        let v = h.angles_to_vectors(array![0.0, PI / 2.0].view());
        assert_abs_diff_eq!(v[[0, 0]], 1.0);
        assert_abs_diff_eq!(v[[1, 1]], 1.0);
        assert_abs_diff_eq!(v[[1, 0]], 0.0, epsilon = 1e-12);

        assert_eq!(h.angles_to_vectors(array![0.0, 0.0].view()).nrows(), 0);
    }
}
