use crate::float_trait::StainFloat;
use ndarray::parallel::prelude::*;
use ndarray::{Array, ArrayView, Dimension, ErrorKind, RemoveAxis, ShapeError};
use num_traits::Float;

/// Default incident (background) light intensity for 8-bit images.
pub const DEFAULT_BACKGROUND: f64 = 255.0;

/// Optical density assigned to a fully dark channel (`I == 0`).
///
/// `-log10(0)` is infinite; every OD in this crate is capped here instead.
pub const MAX_OPTICAL_DENSITY: f64 = 6.0;

/// Convert one channel intensity to optical density, `OD = -log10(I / I0)`.
///
/// Intensities brighter than the background would give negative OD; those
/// clamp to zero, as does every value on the way back in [`od_to_intensity`].
#[inline]
pub fn intensity_to_od<F: StainFloat>(intensity: F, background: F) -> F {
    let cap = F::of(MAX_OPTICAL_DENSITY);
    if intensity <= F::zero() || background <= F::zero() {
        return cap;
    }
    let od = -Float::log10(intensity / background);
    Float::min(Float::max(od, F::zero()), cap)
}

/// Convert one optical density back to intensity, `I = I0 * 10^(-OD)`.
#[inline]
pub fn od_to_intensity<F: StainFloat>(od: F, background: F) -> F {
    let od = Float::max(od, F::zero());
    let ten = F::of(10.0);
    Float::min(background * Float::powf(ten, -od), background)
}

/// Convert a three channel triplet to optical density.
#[inline]
pub fn rgb_to_od_pixel<F: StainFloat>(rgb: [F; 3], background: F) -> [F; 3] {
    rgb.map(|v| intensity_to_od(v, background))
}

/// Convert an optical density triplet back to a colour triplet.
#[inline]
pub fn od_to_rgb_pixel<F: StainFloat>(od: [F; 3], background: F) -> [F; 3] {
    od.map(|v| od_to_intensity(v, background))
}

/// Convert an RGB image or pixel matrix to optical density.
///
/// The last axis holds the colour channels; any leading shape is kept, so
/// both `(H, W, 3)` images and `(N, 3)` sample matrices are accepted.
/// `background` may hold one value for all channels or one per channel and
/// defaults to [`DEFAULT_BACKGROUND`].
pub fn rgb_to_od<F, D>(
    rgb_im: ArrayView<F, D>,
    background: Option<&[F]>,
) -> Result<Array<F, D>, ShapeError>
where
    F: StainFloat,
    D: Dimension + RemoveAxis,
{
    map_channels(rgb_im, background, intensity_to_od)
}

/// Convert an optical density image or matrix back to RGB, clamped to `[0, I0]`.
pub fn od_to_rgb<F, D>(
    od_im: ArrayView<F, D>,
    background: Option<&[F]>,
) -> Result<Array<F, D>, ShapeError>
where
    F: StainFloat,
    D: Dimension + RemoveAxis,
{
    map_channels(od_im, background, od_to_intensity)
}

fn map_channels<F, D>(
    im: ArrayView<F, D>,
    background: Option<&[F]>,
    op: fn(F, F) -> F,
) -> Result<Array<F, D>, ShapeError>
where
    F: StainFloat,
    D: Dimension + RemoveAxis,
{
    if im.ndim() < 2 {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape));
    }
    let n_channels = im.shape()[im.ndim() - 1];
    let bg = match background {
        Some(arr) if arr.len() == 1 => vec![arr[0]; n_channels],
        Some(arr) if arr.len() == n_channels => arr.to_vec(),
        None => vec![F::of(DEFAULT_BACKGROUND); n_channels],
        _ => return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape)),
    };

    let mut out = im.to_owned();
    if bg.iter().all(|&v| v == bg[0]) {
        let b = bg[0];
        out.par_iter_mut().for_each(|x| *x = op(*x, b));
    } else {
        out.outer_iter_mut().into_par_iter().for_each(|mut row| {
            for (i, x) in row.iter_mut().enumerate() {
                *x = op(*x, bg[i % n_channels]);
            }
        });
    }
    Ok(out)
}

/// Precomputed 8-bit intensity to optical density table.
///
/// Used by pixel sampling and region averaging, where the same 256 values
/// are converted millions of times.
#[derive(Debug, Clone)]
pub struct OdLookup<F: StainFloat> {
    table: [F; 256],
    background: F,
}

impl<F: StainFloat> OdLookup<F> {
    pub fn new(background: F) -> Self {
        let mut table = [F::zero(); 256];
        for (i, v) in table.iter_mut().enumerate() {
            *v = intensity_to_od(F::of(i as f64), background);
        }
        Self { table, background }
    }

    #[inline]
    pub fn od(&self, value: u8) -> F {
        self.table[value as usize]
    }

    #[inline]
    pub fn od_pixel(&self, rgb: [u8; 3]) -> [F; 3] {
        rgb.map(|v| self.od(v))
    }

    pub fn background(&self) -> F {
        self.background
    }
}

impl<F: StainFloat> Default for OdLookup<F> {
    fn default() -> Self {
        Self::new(F::of(DEFAULT_BACKGROUND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    #[test]
    fn test_od_round_trip_full_range() {
        for v in 0..=255u32 {
            let i = v as f64;
            let back = od_to_intensity(intensity_to_od(i, 255.0), 255.0);
            assert_abs_diff_eq!(back, i, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_zero_intensity_is_capped() {
        let od = intensity_to_od(0.0_f64, 255.0);
        assert!(od.is_finite());
        assert_eq!(od, MAX_OPTICAL_DENSITY);
    }

    #[test]
    fn test_brighter_than_background_clamps() {
        assert_eq!(intensity_to_od(300.0_f64, 255.0), 0.0);
        assert_eq!(od_to_intensity(-0.5_f64, 255.0), 255.0);
    }

    #[test]
    fn test_rgb_to_od_matrix_and_image() {
        let m = array![[255.0_f64, 25.5, 2.55], [127.5, 255.0, 255.0]];
        let od = rgb_to_od(m.view(), None).unwrap();
        assert_abs_diff_eq!(od[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(od[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(od[[0, 2]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(od[[1, 0]], 2.0_f64.log10(), epsilon = 1e-12);

        let im = Array3::<f32>::from_elem((4, 5, 3), 25.5);
        let od = rgb_to_od(im.view(), Some(&[255.0])).unwrap();
        assert!(od.iter().all(|&v| (v - 1.0).abs() < 1e-5));
        let back = od_to_rgb(od.view(), None).unwrap();
        assert!(back.iter().all(|&v| (v - 25.5).abs() < 1e-3));
    }

    #[test]
    fn test_per_channel_background() {
        let m = array![[100.0_f64, 200.0, 50.0]];
        let od = rgb_to_od(m.view(), Some(&[100.0, 200.0, 500.0])).unwrap();
        assert_abs_diff_eq!(od[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(od[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(od[[0, 2]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_background_length() {
        let m = array![[100.0_f64, 200.0, 50.0]];
        assert!(rgb_to_od(m.view(), Some(&[1.0, 2.0])).is_err());
    }

    #[test]
    fn test_lookup_matches_direct() {
        let lut = OdLookup::<f64>::default();
        for v in [0u8, 1, 17, 128, 254, 255] {
            assert_eq!(lut.od(v), intensity_to_od(v as f64, 255.0));
        }
    }
}
