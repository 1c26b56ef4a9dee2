use crate::abort::AbortSignal;
use crate::config::EstimationParameters;
use crate::error::{StainError, StainResult};
use crate::image::{ImageSource, RegionOfInterest};
use crate::sampler::{RandomPixelSampler, SampleRequest};
use crate::separate_stains_macenko::MacenkoEstimator;
use crate::separate_stains_nmf::NmfEstimator;
use crate::separate_stains_roi::RoiEstimator;
use crate::stain_matrix::StainVectors;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Sampling strategies need strictly more tissue pixels than this.
pub const MIN_SAMPLES: usize = 3;

/// Identifier of a stain separation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeparationAlgorithm {
    /// Mean optical density of user-drawn regions, one per stain
    RegionOfInterest,
    /// Angular percentile extremes in the plane of maximal OD variance
    Macenko,
    /// Non-negative matrix factorization of sampled OD values
    Nmf,
}

/// Static description of a strategy.
#[derive(Debug)]
pub struct AlgorithmInfo {
    pub algorithm: SeparationAlgorithm,
    pub name: &'static str,
    /// Stain counts the strategy can produce
    pub stain_counts: &'static [usize],
    /// Profile parameter keys the strategy reads
    pub parameters: &'static [&'static str],
}

/// Every available strategy, in presentation order.
pub static ALGORITHMS: [AlgorithmInfo; 3] = [
    AlgorithmInfo {
        algorithm: SeparationAlgorithm::RegionOfInterest,
        name: "Region-of-interest selection",
        stain_counts: &[1, 2, 3],
        parameters: &[],
    },
    AlgorithmInfo {
        algorithm: SeparationAlgorithm::Macenko,
        name: "Macenko decomposition",
        stain_counts: &[2],
        parameters: &["numPixels", "threshold", "percentile", "histogramBins"],
    },
    AlgorithmInfo {
        algorithm: SeparationAlgorithm::Nmf,
        name: "Non-negative matrix factorization",
        stain_counts: &[2],
        parameters: &["numPixels", "threshold"],
    },
];

impl SeparationAlgorithm {
    pub fn info(self) -> &'static AlgorithmInfo {
        match self {
            SeparationAlgorithm::RegionOfInterest => &ALGORITHMS[0],
            SeparationAlgorithm::Macenko => &ALGORITHMS[1],
            SeparationAlgorithm::Nmf => &ALGORITHMS[2],
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALGORITHMS.iter().find(|a| a.name == name).map(|a| a.algorithm)
    }

    pub fn supports(self, num_stains: usize) -> bool {
        self.info().stain_counts.contains(&num_stains)
    }

    /// Sampling strategies get their rows put into canonical red-OD order.
    pub fn needs_sorting(self) -> bool {
        !matches!(self, SeparationAlgorithm::RegionOfInterest)
    }

    /// `UnsupportedStainCount` unless the strategy can produce `num_stains`.
    pub fn check_stain_count(self, num_stains: usize) -> StainResult<()> {
        if self.supports(num_stains) {
            return Ok(());
        }
        let info = self.info();
        Err(StainError::UnsupportedStainCount {
            algorithm: info.name,
            supported: info.stain_counts.iter().copied().max().unwrap_or(0),
            requested: num_stains,
        })
    }
}

/// Names of all strategies, without constructing any estimator.
pub fn algorithm_names() -> impl Iterator<Item = &'static str> {
    ALGORITHMS.iter().map(|a| a.name)
}

/// Common contract of the stain vector strategies.
///
/// On success the flat 3×3 output holds one (not necessarily unit length)
/// stain vector per row, trailing rows zero. On failure `out` is left
/// exactly as the caller initialised it.
pub trait StainVectorEstimator {
    fn algorithm(&self) -> SeparationAlgorithm;

    fn compute_stain_vectors(&self, out: &mut StainVectors) -> StainResult<()>;

    /// Strategies that sample pixels use this as their sample size.
    fn set_sample_size(&mut self, _num_pixels: usize) {}

    fn compute_stain_vectors_with_sample_size(
        &mut self,
        out: &mut StainVectors,
        num_pixels: usize,
    ) -> StainResult<()> {
        self.set_sample_size(num_pixels);
        self.compute_stain_vectors(out)
    }
}

/// Everything an estimator may need, borrowed from the owning session.
pub struct EstimatorInput<'a, S: ImageSource + ?Sized> {
    pub source: &'a S,
    pub num_stains: usize,
    pub parameters: &'a EstimationParameters,
    pub regions: &'a [RegionOfInterest],
    pub abort: Option<&'a AbortSignal>,
}

// Manual impls: a derive would demand `S: Copy`.
impl<S: ImageSource + ?Sized> Clone for EstimatorInput<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ImageSource + ?Sized> Copy for EstimatorInput<'_, S> {}

impl<S: ImageSource + ?Sized> EstimatorInput<'_, S> {
    pub(crate) fn check_abort(&self) -> StainResult<()> {
        match self.abort {
            Some(a) => a.check(),
            None => Ok(()),
        }
    }

    /// Random tissue OD samples (N×3) for the sampling strategies.
    pub(crate) fn sample_optical_density(&self, num_pixels: usize) -> StainResult<Array2<f64>> {
        let params = self.parameters;
        let request = SampleRequest {
            num_pixels,
            od_threshold: params.od_threshold,
            level: params.level,
            bounds: params.bounds,
        };
        let samples =
            RandomPixelSampler::new(self.source, params.seed).choose_random_pixels(&request, self.abort)?;
        if samples.nrows() <= MIN_SAMPLES {
            return Err(StainError::InsufficientSamples {
                needed: MIN_SAMPLES,
                found: samples.nrows(),
            });
        }
        Ok(samples)
    }
}

/// Strategy dispatch keyed by [`SeparationAlgorithm`].
pub enum StainEstimator<'a, S: ImageSource + ?Sized> {
    RegionOfInterest(RoiEstimator<'a, S>),
    Macenko(MacenkoEstimator<'a, S>),
    Nmf(NmfEstimator<'a, S>),
}

impl<'a, S: ImageSource + ?Sized> StainEstimator<'a, S> {
    /// Build the estimator for `algorithm`, rejecting unsupported stain counts.
    pub fn new(algorithm: SeparationAlgorithm, input: EstimatorInput<'a, S>) -> StainResult<Self> {
        algorithm.check_stain_count(input.num_stains)?;
        Ok(match algorithm {
            SeparationAlgorithm::RegionOfInterest => Self::RegionOfInterest(RoiEstimator::new(input)),
            SeparationAlgorithm::Macenko => Self::Macenko(MacenkoEstimator::new(input)),
            SeparationAlgorithm::Nmf => Self::Nmf(NmfEstimator::new(input)),
        })
    }

    fn inner(&self) -> &dyn StainVectorEstimator {
        match self {
            Self::RegionOfInterest(e) => e,
            Self::Macenko(e) => e,
            Self::Nmf(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn StainVectorEstimator {
        match self {
            Self::RegionOfInterest(e) => e,
            Self::Macenko(e) => e,
            Self::Nmf(e) => e,
        }
    }
}

impl<S: ImageSource + ?Sized> StainVectorEstimator for StainEstimator<'_, S> {
    fn algorithm(&self) -> SeparationAlgorithm {
        self.inner().algorithm()
    }

    fn compute_stain_vectors(&self, out: &mut StainVectors) -> StainResult<()> {
        self.inner().compute_stain_vectors(out)
    }

    fn set_sample_size(&mut self, num_pixels: usize) {
        self.inner_mut().set_sample_size(num_pixels)
    }
}
