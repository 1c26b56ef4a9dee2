use crate::image::Rect;
use crate::percentile_threshold::{DEFAULT_HISTOGRAM_BINS, DEFAULT_PERCENTILE};
use crate::tile_cache::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};

/// Seed used when the caller does not pick one, so runs are reproducible.
pub const DEFAULT_SEED: u64 = 0x5EED_57A1;

/// Parameters of one estimation run.
///
/// Deserializes with `#[serde(default)]`, so a partial document only
/// overrides the keys it names; [`EstimationParameters::sanitize`] then
/// pulls out-of-range values back into their valid domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationParameters {
    /// Pixels drawn from the image before background rejection
    pub num_pixels: usize,
    /// Minimum summed RGB optical density for a sampled pixel to count as tissue
    pub od_threshold: f64,
    /// Central percentile of angular mass bounded by the two Macenko directions
    pub percentile: f64,
    /// Angle histogram bins for the Macenko step
    pub histogram_bins: usize,
    /// Resolution level sampled
    pub level: u32,
    /// Optional bounding rectangle for sampling (level coordinates)
    pub bounds: Option<Rect>,
    /// RNG seed for pixel sampling and NMF initialisation
    pub seed: u64,
    pub nmf_max_iterations: usize,
    /// Relative change in reconstruction error at which NMF stops
    pub nmf_tolerance: f64,
}

impl Default for EstimationParameters {
    fn default() -> Self {
        Self {
            num_pixels: 10_000,
            od_threshold: 0.15,
            percentile: DEFAULT_PERCENTILE,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            level: 0,
            bounds: None,
            seed: DEFAULT_SEED,
            nmf_max_iterations: 500,
            nmf_tolerance: 1e-6,
        }
    }
}

impl EstimationParameters {
    /// Clamp values into their valid ranges.
    ///
    /// A zero sample size is left alone: it is a caller error the
    /// estimators report rather than something to paper over.
    pub fn sanitize(mut self) -> Self {
        if !self.od_threshold.is_finite() || self.od_threshold < 0.0 {
            self.od_threshold = 0.0;
        }
        self.percentile = if self.percentile.is_nan() {
            DEFAULT_PERCENTILE
        } else {
            self.percentile.clamp(0.0, 100.0)
        };
        if self.nmf_tolerance.is_nan() || self.nmf_tolerance < 0.0 {
            self.nmf_tolerance = 0.0;
        }
        self
    }
}

/// How the unmixed result is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Zero-based index of the stain to display
    pub stain_index: usize,
    /// Zero out contributions below `threshold`
    pub apply_threshold: bool,
    /// Optical density threshold for suppression
    pub threshold: f64,
    /// Maximum number of unmixed tiles kept in memory
    pub cache_capacity: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            stain_index: 0,
            apply_threshold: false,
            threshold: 0.2,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}
