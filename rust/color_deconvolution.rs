use crate::color_conversion::{od_to_rgb, od_to_rgb_pixel, rgb_to_od, OdLookup, DEFAULT_BACKGROUND};
use crate::complement_stain_matrix::complement_stain_matrix;
use crate::error::{StainError, StainResult};
use crate::float_trait::StainFloat;
use crate::image::RgbImage;
use crate::linalg::{invert_or_fallback, InverseKind};
use crate::stain_matrix::{row, to_flat, StainVectors, MAX_STAINS};
use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use num_traits::{Float, ToPrimitive};
use rayon::prelude::*;

/// Per-pixel unmixing for one stain matrix.
///
/// The matrix is normalized and complemented to three rows, then inverted
/// once. Stains mix additively in OD space, `od = c · S` with the stains as
/// rows of `S`, so the concentrations of a pixel are `c = od · S⁻¹`.
#[derive(Debug, Clone)]
pub struct UnmixingKernel {
    stains: StainVectors,
    inverse: [[f64; 3]; 3],
    inverse_kind: InverseKind,
    num_stains: usize,
    lookup: OdLookup<f64>,
}

impl UnmixingKernel {
    pub fn new(stains: &StainVectors, num_stains: usize) -> Self {
        Self::with_background(stains, num_stains, DEFAULT_BACKGROUND)
    }

    pub fn with_background(stains: &StainVectors, num_stains: usize, background: f64) -> Self {
        let num_stains = num_stains.min(MAX_STAINS);
        let stains = complement_stain_matrix(stains, num_stains);
        let (inverse, inverse_kind) = invert_rows(&stains);
        match inverse_kind {
            InverseKind::Exact => debug!("stain matrix inverted exactly"),
            InverseKind::Pseudo => warn!("stain matrix is singular, using its pseudo-inverse"),
            InverseKind::Identity => warn!("stain matrix cannot be inverted, passing OD through unchanged"),
        }
        Self {
            stains,
            inverse,
            inverse_kind,
            num_stains,
            lookup: OdLookup::new(background),
        }
    }

    /// The complemented, normalized matrix actually inverted
    pub fn stain_matrix(&self) -> &StainVectors {
        &self.stains
    }

    pub fn inverse_kind(&self) -> InverseKind {
        self.inverse_kind
    }

    pub fn num_stains(&self) -> usize {
        self.num_stains
    }

    /// Concentration of every (complemented) stain for one OD vector
    #[inline]
    pub fn concentrations(&self, od: [f64; 3]) -> [f64; 3] {
        let m = &self.inverse;
        [
            od[0] * m[0][0] + od[1] * m[1][0] + od[2] * m[2][0],
            od[0] * m[0][1] + od[1] * m[1][1] + od[2] * m[2][1],
            od[0] * m[0][2] + od[1] * m[1][2] + od[2] * m[2][2],
        ]
    }

    /// Display colour of one stain's contribution to an RGB pixel.
    ///
    /// With `threshold` set, concentrations below it are zeroed and the
    /// pixel becomes background.
    #[inline]
    pub fn unmix_pixel(&self, rgb: [u8; 3], stain_index: usize, threshold: Option<f64>) -> [u8; 3] {
        let k = stain_index.min(MAX_STAINS - 1);
        let mut c = self.concentrations(self.lookup.od_pixel(rgb))[k];
        if threshold.is_some_and(|t| c < t) {
            c = 0.0;
        }
        let s = row(&self.stains, k);
        let out = od_to_rgb_pixel([c * s[0], c * s[1], c * s[2]], self.lookup.background());
        out.map(to_u8)
    }

    /// Unmix every pixel of a tile, rows in parallel.
    pub fn unmix_image(&self, image: &RgbImage, stain_index: usize, threshold: Option<f64>) -> RgbImage {
        let mut out = image.clone();
        let row_len = image.width() as usize * 3;
        if row_len == 0 {
            return out;
        }
        out.data_mut().par_chunks_mut(row_len).for_each(|line| {
            for px in line.chunks_exact_mut(3) {
                let rgb = self.unmix_pixel([px[0], px[1], px[2]], stain_index, threshold);
                px.copy_from_slice(&rgb);
            }
        });
        out
    }
}

fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0).to_u8().unwrap_or(0)
}

/// Complemented stain rows and their inverse, converted to `F`.
fn stain_matrices<F: StainFloat>(stain_matrix: &ArrayView2<F>) -> StainResult<(Array2<F>, Array2<F>)> {
    let flat = to_flat(stain_matrix).ok_or_else(|| {
        StainError::InvalidInput(format!(
            "stain matrix must have 1 to 3 rows of 3 components, got {:?}",
            stain_matrix.shape()
        ))
    })?;
    let complemented = complement_stain_matrix(&flat, stain_matrix.nrows());
    let (inverse, _) = invert_rows(&complemented);
    let stains = Array2::from_shape_fn((3, 3), |(i, j)| F::of(complemented[i * 3 + j]));
    let inverse = Array2::from_shape_fn((3, 3), |(i, j)| F::of(inverse[i][j]));
    Ok((stains, inverse))
}

fn invert_rows(stains: &StainVectors) -> ([[f64; 3]; 3], InverseKind) {
    invert_or_fallback(&[row(stains, 0), row(stains, 1), row(stains, 2)])
}

/// Deconvolve an `(H, W, 3)` optical density image into stain concentrations.
///
/// `stain_matrix` holds one stain per row (1 to 3 rows). Missing rows are
/// complemented, so channel `i` of the result is the concentration of stain
/// `i` and channels past the stain count hold the residual.
pub fn color_deconvolution<F: StainFloat>(
    im_od: ArrayView3<F>,
    stain_matrix: ArrayView2<F>,
) -> StainResult<Array3<F>> {
    let (h, w, c) = im_od.dim();
    if c != 3 {
        return Err(StainError::InvalidInput(format!("image must have 3 channels, got {c}")));
    }
    let (_, inverse) = stain_matrices(&stain_matrix)?;
    let od_flat = im_od.to_shape((h * w, 3))?;
    Ok(od_flat.dot(&inverse).into_shape_with_order((h, w, 3))?)
}

/// Convert RGB to optical density, then deconvolve into stain concentrations.
pub fn rgb_color_deconvolution<F: StainFloat>(
    im_rgb: ArrayView3<F>,
    stain_matrix: ArrayView2<F>,
    background: Option<&[F]>,
) -> StainResult<Array3<F>> {
    let im_od = rgb_to_od(im_rgb, background)?;
    color_deconvolution(im_od.view(), stain_matrix)
}

/// Rebuild an RGB image from stain concentrations, clamped to `[0, I0]`.
///
/// Zeroing concentration channels before the call renders a subset of
/// stains only.
pub fn reconstruct_rgb<F: StainFloat>(
    concentrations: ArrayView3<F>,
    stain_matrix: ArrayView2<F>,
    background: Option<F>,
) -> StainResult<Array3<F>> {
    let (h, w, c) = concentrations.dim();
    if c != 3 {
        return Err(StainError::InvalidInput(format!(
            "concentrations must have 3 channels, got {c}"
        )));
    }
    let (stains, _) = stain_matrices(&stain_matrix)?;
    let bg = background.unwrap_or_else(|| F::of(DEFAULT_BACKGROUND));
    if !(Float::is_finite(bg) && bg > F::zero()) {
        return Err(StainError::InvalidInput("background must be positive".into()));
    }
    let conc_flat = concentrations.to_shape((h * w, 3))?;
    let od = conc_flat.dot(&stains).into_shape_with_order((h, w, 3))?;
    Ok(od_to_rgb(od.view(), Some(&[bg][..]))?)
}
