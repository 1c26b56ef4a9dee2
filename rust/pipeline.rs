use crate::abort::AbortSignal;
use crate::color_deconvolution::UnmixingKernel;
use crate::config::{DisplayOptions, EstimationParameters};
use crate::error::{StainError, StainResult};
use crate::image::{ImageSource, RegionOfInterest, RgbImage, TileCoord};
use crate::profile::StainProfile;
use crate::stain_estimator::{EstimatorInput, SeparationAlgorithm, StainEstimator, StainVectorEstimator};
use crate::stain_matrix::{normalize_flat, sort_stain_vectors, SortOrder, StainVectors, MAX_STAINS};
use crate::tile_cache::TileCache;
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;

/// Everything a build depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub algorithm: SeparationAlgorithm,
    pub num_stains: usize,
    pub estimation: EstimationParameters,
    /// One region per stain, used by the region strategy
    pub regions: Vec<RegionOfInterest>,
    pub display: DisplayOptions,
}

impl PipelineConfig {
    pub fn new(algorithm: SeparationAlgorithm, num_stains: usize) -> Self {
        Self {
            algorithm,
            num_stains,
            estimation: EstimationParameters::default(),
            regions: Vec::new(),
            display: DisplayOptions::default(),
        }
    }

    /// Whether `other` would produce the same stain vectors.
    fn same_estimation(&self, other: &PipelineConfig) -> bool {
        self.algorithm == other.algorithm
            && self.num_stains == other.num_stains
            && self.estimation == other.estimation
            && (self.algorithm != SeparationAlgorithm::RegionOfInterest || self.regions == other.regions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Unconfigured,
    Built,
    Rebuilt,
}

/// What a call to [`UnmixingPipeline::build`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Configuration unchanged; the previous pipeline and its cache are kept
    Reused,
    /// Only display options changed; stain vectors kept, new kernel and cache
    Redisplayed,
    /// Stain vectors estimated anew
    Estimated,
}

struct BuiltPipeline {
    config: PipelineConfig,
    stains: StainVectors,
    kernel: UnmixingKernel,
    cache: Arc<TileCache<TileCoord, RgbImage>>,
}

/// Estimation and unmixing session over one image source.
///
/// [`UnmixingPipeline::build`] runs the configured estimator, canonicalizes
/// the stain matrix, prepares the unmixing kernel and starts a fresh tile
/// cache. Tiles are then served on demand through the cache.
pub struct UnmixingPipeline<S: ImageSource> {
    source: S,
    abort: AbortSignal,
    state: PipelineState,
    built: Option<BuiltPipeline>,
}

impl<S: ImageSource> UnmixingPipeline<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            abort: AbortSignal::new(),
            state: PipelineState::Unconfigured,
            built: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Signal polled by running builds. Raising it fails the build in
    /// progress (and any later build until [`AbortSignal::reset`]).
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> Option<&PipelineConfig> {
        self.built.as_ref().map(|b| &b.config)
    }

    /// Normalized stain vectors of the current build.
    pub fn stain_vectors(&self) -> Option<&StainVectors> {
        self.built.as_ref().map(|b| &b.stains)
    }

    pub fn kernel(&self) -> Option<&UnmixingKernel> {
        self.built.as_ref().map(|b| &b.kernel)
    }

    pub fn cache(&self) -> Option<&Arc<TileCache<TileCoord, RgbImage>>> {
        self.built.as_ref().map(|b| &b.cache)
    }

    /// Bring the pipeline up to date with `config`.
    ///
    /// An unchanged configuration is a no-op that keeps the cache.
    /// On any error, including an abort, the previously built pipeline
    /// stays in place untouched.
    pub fn build(&mut self, config: &PipelineConfig) -> StainResult<BuildOutcome> {
        let mut config = config.clone();
        config.estimation = config.estimation.sanitize();
        if let Some(built) = &self.built {
            if built.config == config {
                debug!("pipeline configuration unchanged, reusing build");
                return Ok(BuildOutcome::Reused);
            }
        }
        if config.display.stain_index >= MAX_STAINS {
            return Err(StainError::InvalidInput(format!(
                "stain index {} out of range",
                config.display.stain_index
            )));
        }

        let (stains, outcome) = match &self.built {
            Some(built) if built.config.same_estimation(&config) => (built.stains, BuildOutcome::Redisplayed),
            _ => (self.estimate(&config)?, BuildOutcome::Estimated),
        };

        let kernel = UnmixingKernel::new(&stains, config.num_stains);
        let cache = Arc::new(TileCache::new(config.display.cache_capacity));
        info!(
            "{} pipeline for {} stains ({:?}): {:?}",
            config.algorithm.name(),
            config.num_stains,
            outcome,
            &stains[..config.num_stains.min(MAX_STAINS) * 3]
        );
        self.built = Some(BuiltPipeline {
            config,
            stains,
            kernel,
            cache,
        });
        self.state = match self.state {
            PipelineState::Unconfigured => PipelineState::Built,
            _ => PipelineState::Rebuilt,
        };
        Ok(outcome)
    }

    fn estimate(&self, config: &PipelineConfig) -> StainResult<StainVectors> {
        let input = EstimatorInput {
            source: &self.source,
            num_stains: config.num_stains,
            parameters: &config.estimation,
            regions: &config.regions,
            abort: Some(&self.abort),
        };
        let estimator = StainEstimator::new(config.algorithm, input)?;
        let mut raw = [0.0; 9];
        estimator.compute_stain_vectors(&mut raw)?;

        let mut stains = normalize_flat(&raw);
        if config.algorithm.needs_sorting() {
            stains = sort_stain_vectors(&stains, config.num_stains, SortOrder::Descending);
        }
        self.abort.check()?;
        Ok(stains)
    }

    /// Profile of the current build with the given stain names.
    pub fn profile(&self, name: &str, stain_names: &[&str]) -> StainResult<StainProfile> {
        let built = self.built()?;
        if stain_names.len() != built.config.num_stains {
            return Err(StainError::InvalidInput(format!(
                "{} stain names given for {} stains",
                stain_names.len(),
                built.config.num_stains
            )));
        }
        let mut profile =
            StainProfile::from_stain_vectors(name, built.config.algorithm, &built.stains, stain_names)?;
        profile.set_parameters(&built.config.estimation);
        Ok(profile)
    }

    fn built(&self) -> StainResult<&BuiltPipeline> {
        self.built
            .as_ref()
            .ok_or_else(|| StainError::InvalidInput("pipeline has not been built".into()))
    }

    /// Unmixed tile at `coord`, from the cache when resident.
    pub fn tile(&self, coord: TileCoord) -> StainResult<Arc<RgbImage>> {
        let built = self.built()?;
        let display = &built.config.display;
        let threshold = display.apply_threshold.then_some(display.threshold);
        built.cache.get_or_insert_with(coord, || -> StainResult<RgbImage> {
            let pixels = self.source.read_tile(coord)?;
            Ok(built.kernel.unmix_image(&pixels, display.stain_index, threshold))
        })
    }

    /// Unmixed tiles for many coordinates, computed in parallel.
    pub fn tiles(&self, coords: &[TileCoord]) -> Vec<StainResult<Arc<RgbImage>>> {
        coords.par_iter().map(|&c| self.tile(c)).collect()
    }
}
