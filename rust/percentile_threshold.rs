use crate::angle_histogram::AngleHistogram;
use crate::float_trait::StainFloat;
use log::debug;
use ndarray::{array, Array2, ArrayView1, ArrayView2};

/// Default central percentile of angular mass kept between the two directions.
pub const DEFAULT_PERCENTILE: f64 = 98.0;
/// Default number of angle histogram bins for the Macenko step.
pub const DEFAULT_HISTOGRAM_BINS: usize = 1024;

/// Finds the two extremal directions of a 2D point cloud (the Macenko histogram step).
///
/// Every point is reduced to its angle, the angles are histogrammed over
/// `[-pi, pi)`, and the bin positions bounding the central `percentile` of
/// the angular mass (the `(100-p)/2` and `100-(100-p)/2` percentiles,
/// linearly interpolated inside the bin) are turned back into unit vectors.
#[derive(Debug, Clone)]
pub struct PercentileThreshold<F: StainFloat> {
    histogram: AngleHistogram<F>,
    percentile: f64,
}

impl<F: StainFloat> Default for PercentileThreshold<F> {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILE, DEFAULT_HISTOGRAM_BINS)
    }
}

impl<F: StainFloat> PercentileThreshold<F> {
    pub fn new(percentile: f64, nbins: usize) -> Self {
        let mut s = Self {
            histogram: AngleHistogram::new(nbins),
            percentile: 0.0,
        };
        s.set_percentile(percentile);
        s
    }

    /// Set the central percentile, clamped to `[0, 100]`.
    pub fn set_percentile(&mut self, p: f64) {
        self.percentile = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    pub fn histogram(&self) -> &AngleHistogram<F> {
        &self.histogram
    }

    /// Two unit direction vectors (rows of a 2×2 array) bounding the central
    /// percentile of the angular distribution of `projected_points`.
    ///
    /// Returns `None` when the percentile is zero or when no point has a
    /// defined angle. All mass in a single bin is not an error; the two
    /// directions are then close or identical.
    pub fn percentile_threshold_vectors(&self, projected_points: &ArrayView2<F>) -> Option<Array2<F>> {
        if self.percentile <= 0.0 {
            return None;
        }
        let angles = self.histogram.vectors_to_angles(projected_points.view());
        if angles.is_empty() {
            return None;
        }
        let hist = self.histogram.fill(angles.view());
        let [lo, hi] = self.find_percentile_threshold_values(&hist.view())?;
        debug!(
            "percentile {}: extremal angles {:?} .. {:?} from {} points",
            self.percentile,
            lo,
            hi,
            angles.len()
        );

        let vectors = self.histogram.angles_to_vectors(array![lo, hi].view());
        if vectors.is_empty() {
            // Both angles exactly zero: the x axis twice
            return Some(array![[F::one(), F::zero()], [F::one(), F::zero()]]);
        }
        Some(vectors)
    }

    /// Angles at the lower and upper percentile bounds of a filled histogram.
    ///
    /// Returns `None` for an empty or massless histogram.
    pub fn find_percentile_threshold_values(&self, hist: &ArrayView1<u64>) -> Option<[F; 2]> {
        let total: u64 = hist.iter().sum();
        if hist.is_empty() || total == 0 {
            return None;
        }
        let total = total as f64;
        let tail = (100.0 - self.percentile) / 200.0;
        let (lower_fraction, upper_fraction) = (tail, 1.0 - tail);

        let mut lower_bin = None;
        let mut upper_bin = None;
        let mut cumulative = 0u64;
        for (bin, &count) in hist.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let prev = cumulative as f64 / total;
            cumulative += count;
            let current = cumulative as f64 / total;
            // Fractional position inside [bin, bin + 1)
            let interpolate = |f: f64| bin as f64 + ((f - prev) / (current - prev)).clamp(0.0, 1.0);

            if lower_bin.is_none() && current >= lower_fraction {
                lower_bin = Some(interpolate(lower_fraction));
            }
            if upper_bin.is_none() && current >= upper_fraction {
                upper_bin = Some(interpolate(upper_fraction));
            }
            if lower_bin.is_some() && upper_bin.is_some() {
                break;
            }
        }
        let lower = self.histogram.bin_to_angle(F::of(lower_bin?));
        let upper = self.histogram.bin_to_angle(F::of(upper_bin?));
        Some([lower, upper])
    }
}
