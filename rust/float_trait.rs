use num_traits::{Float, FloatConst};
use std::fmt::Debug;

/// Supertrait combining all bounds needed by the generic stain kernels.
///
/// Implemented for `f32` and `f64`. Small fixed-size decompositions are
/// carried out in `f64` regardless (see `linalg`), so the trait only needs
/// the `num-traits` float surface plus thread-safety for rayon.
pub trait StainFloat: Float + FloatConst + Debug + Send + Sync + 'static {
    /// Lossy conversion from an `f64` constant.
    fn of(v: f64) -> Self;
}

impl StainFloat for f32 {
    #[inline]
    fn of(v: f64) -> Self {
        v as f32
    }
}

impl StainFloat for f64 {
    #[inline]
    fn of(v: f64) -> Self {
        v
    }
}
