use thiserror::Error;

/// Result type for estimation and pipeline operations
pub type StainResult<T> = Result<T, StainError>;

/// Errors surfaced by estimators and pipeline builds.
///
/// The numeric kernels never produce these; they signal failure with empty
/// output or sentinel values instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StainError {
    /// A parameter or input set is unusable (zero sample size, bad percentile, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The chosen algorithm cannot produce the requested number of stains
    #[error("{algorithm} supports exactly {supported} stains, {requested} requested")]
    UnsupportedStainCount {
        algorithm: &'static str,
        supported: usize,
        requested: usize,
    },

    /// A region of interest required by the region strategy is missing
    #[error("Missing region of interest for stain {0}")]
    MissingRegion(usize),

    /// Sampling produced too few usable pixels
    #[error("Insufficient samples: needed more than {needed}, got {found}")]
    InsufficientSamples { needed: usize, found: usize },

    /// A numeric step produced no usable output
    #[error("Computation failed: {0}")]
    Computation(String),

    /// The user requested a stop while estimation was running
    #[error("Stain vector computation aborted")]
    Aborted,

    /// Array shape mismatch
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// The image source failed to deliver pixels
    #[error("Image source error: {0}")]
    Source(String),
}
