use crate::color_conversion::rgb_to_od;
use crate::error::{StainError, StainResult};
use crate::float_trait::StainFloat;
use crate::separate_stains_macenko::separate_stains_macenko;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

/// Compute two Macenko stain vectors directly from an `(H, W, 3)` RGB array.
///
/// Every pixel is converted to optical density; pixels whose summed OD is
/// not above `od_threshold`, and pixels set in `mask_out`, are left out.
/// The result is the 2×3 matrix of [`separate_stains_macenko`].
pub fn rgb_separate_stains_macenko<F: StainFloat>(
    im_rgb: ArrayView3<F>,
    background: Option<&[F]>,
    od_threshold: F,
    percentile: f64,
    histogram_bins: usize,
    mask_out: Option<ArrayView2<bool>>,
) -> StainResult<Array2<F>> {
    let (h, w, c) = im_rgb.dim();
    if c != 3 {
        return Err(StainError::InvalidInput(format!("expected 3 channels, got {c}")));
    }
    if let Some(mask) = &mask_out {
        if mask.dim() != (h, w) {
            return Err(StainError::InvalidInput(format!(
                "mask shape {:?} does not match image {}x{}",
                mask.dim(),
                h,
                w
            )));
        }
    }

    let od = rgb_to_od(im_rgb, background)?;
    let od = od.into_shape_with_order((h * w, 3))?;
    let keep: Vec<usize> = od
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(i, row)| {
            let masked = mask_out.as_ref().is_some_and(|m| m[[i / w, i % w]]);
            !masked && row.sum() > od_threshold
        })
        .map(|(i, _)| i)
        .collect();
    let tissue = od.select(Axis(0), &keep);

    separate_stains_macenko(&tissue.view(), percentile, histogram_bins).ok_or_else(|| {
        StainError::Computation(format!("Macenko separation failed on {} tissue pixels", keep.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn image() -> Array3<f64> {
        Array3::from_shape_fn((32, 32, 3), |(y, x, ch)| {
            let rgb = match (x / 8 + y / 8) % 3 {
                0 => [200.0, 50.0, 50.0],
                1 => [50.0, 180.0, 60.0],
                _ => [255.0, 255.0, 255.0],
            };
            rgb[ch]
        })
    }

    #[test]
    fn test_two_unit_vectors() {
        let stains = rgb_separate_stains_macenko(image().view(), None, 0.15, 98.0, 256, None).unwrap();
        assert_eq!(stains.dim(), (2, 3));
        for row in stains.rows() {
            assert!((row.dot(&row) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mask_everything_fails() {
        let mask = Array2::from_elem((32, 32), true);
        let r = rgb_separate_stains_macenko(image().view(), None, 0.15, 98.0, 256, Some(mask.view()));
        assert!(matches!(r, Err(StainError::Computation(_))));
    }

    #[test]
    fn test_wrong_channel_count() {
        let im = Array3::<f64>::zeros((4, 4, 4));
        assert!(rgb_separate_stains_macenko(im.view(), None, 0.15, 98.0, 256, None).is_err());
    }
}
