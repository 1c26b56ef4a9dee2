//! Stain vector estimation and colour deconvolution for brightfield
//! microscopy images.
//!
//! Stain vectors are estimated from user-drawn regions, with the Macenko
//! angular-percentile method, or by non-negative matrix factorization.
//! [`UnmixingPipeline`] turns them into per-stain display tiles served
//! through a bounded LRU cache.

pub mod abort;
pub mod angle_histogram;
pub mod basis_transform;
pub mod color_conversion;
pub mod color_deconvolution;
pub mod complement_stain_matrix;
pub mod config;
pub mod error;
pub mod float_trait;
pub mod image;
pub mod linalg;
pub mod percentile_threshold;
pub mod pipeline;
pub mod profile;
pub mod rgb_separate_stains_macenko;
pub mod sampler;
pub mod separate_stains_macenko;
pub mod separate_stains_nmf;
pub mod separate_stains_roi;
pub mod stain_estimator;
pub mod stain_matrix;
pub mod tile_cache;

pub use abort::AbortSignal;
pub use angle_histogram::AngleHistogram;
pub use basis_transform::BasisTransform;
pub use color_conversion::{od_to_rgb, rgb_to_od, OdLookup};
pub use color_deconvolution::{color_deconvolution, reconstruct_rgb, rgb_color_deconvolution, UnmixingKernel};
pub use config::{DisplayOptions, EstimationParameters};
pub use error::{StainError, StainResult};
pub use float_trait::StainFloat;
pub use image::{ImageSource, InMemoryImage, Rect, RegionOfInterest, RgbImage, TileCoord};
pub use percentile_threshold::PercentileThreshold;
pub use pipeline::{BuildOutcome, PipelineConfig, PipelineState, UnmixingPipeline};
pub use profile::{StainComponent, StainProfile};
pub use rgb_separate_stains_macenko::rgb_separate_stains_macenko;
pub use sampler::{RandomPixelSampler, SampleRequest};
pub use separate_stains_macenko::separate_stains_macenko;
pub use separate_stains_nmf::{separate_stains_nmf, NmfOptions};
pub use stain_estimator::{
    algorithm_names, AlgorithmInfo, EstimatorInput, SeparationAlgorithm, StainEstimator, StainVectorEstimator,
    ALGORITHMS,
};
pub use stain_matrix::{sort_stain_vectors, SortOrder, StainVectors};
pub use tile_cache::{CacheStats, TileCache};
