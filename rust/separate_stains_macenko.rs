use crate::basis_transform::BasisTransform;
use crate::error::{StainError, StainResult};
use crate::float_trait::StainFloat;
use crate::image::ImageSource;
use crate::linalg::normalize_rows;
use crate::percentile_threshold::PercentileThreshold;
use crate::stain_estimator::{EstimatorInput, SeparationAlgorithm, StainVectorEstimator};
use crate::stain_matrix::{to_flat, StainVectors};
use log::info;
use ndarray::{Array2, ArrayView2, Axis};
use num_traits::Float;

/// Compute two stain vectors from N×3 optical density samples with the Macenko method.
///
/// The samples are projected (without centering) onto the plane spanned by
/// the two leading directions of their second moment; the angles bounding
/// the central `percentile` of the projected cloud are mapped back into OD
/// space. Rows of the 2×3 result are unit length.
///
/// Rows with non-finite values are dropped first. Returns `None` when
/// fewer than four usable rows remain or no direction can be extracted.
pub fn separate_stains_macenko<F: StainFloat>(
    od: &ArrayView2<F>,
    percentile: f64,
    histogram_bins: usize,
) -> Option<Array2<F>> {
    let m = exclude_nonfinite(od);
    macenko_stages(&m.view(), percentile, histogram_bins, || Ok(()))
        .ok()
        .flatten()
}

/// Basis, projection, percentile extraction and back-projection.
///
/// `checkpoint` runs between the stages; its error ends the computation.
/// `Ok(None)` means the samples yielded no plane or no directions.
fn macenko_stages<F: StainFloat>(
    od: &ArrayView2<F>,
    percentile: f64,
    histogram_bins: usize,
    checkpoint: impl Fn() -> StainResult<()>,
) -> StainResult<Option<Array2<F>>> {
    let Some(basis) = BasisTransform::new(od, true) else {
        return Ok(None);
    };
    let projected = basis.project_points(od, false);
    checkpoint()?;

    let Some(directions) =
        PercentileThreshold::new(percentile, histogram_bins).percentile_threshold_vectors(&projected.view())
    else {
        return Ok(None);
    };
    checkpoint()?;

    let stains = basis.back_project_points(&directions.view(), false);
    Ok(Some(normalize_rows(&stains.view())))
}

/// Keep only rows whose values are all finite
fn exclude_nonfinite<F: StainFloat>(m: &ArrayView2<F>) -> Array2<F> {
    let keep: Vec<usize> = m
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|v| Float::is_finite(*v)))
        .map(|(i, _)| i)
        .collect();
    m.select(Axis(0), &keep)
}

/// Two-stain estimator sampling the whole image (or the configured bounds).
pub struct MacenkoEstimator<'a, S: ImageSource + ?Sized> {
    input: EstimatorInput<'a, S>,
    num_pixels: usize,
}

impl<'a, S: ImageSource + ?Sized> MacenkoEstimator<'a, S> {
    pub fn new(input: EstimatorInput<'a, S>) -> Self {
        Self {
            num_pixels: input.parameters.num_pixels,
            input,
        }
    }
}

impl<S: ImageSource + ?Sized> StainVectorEstimator for MacenkoEstimator<'_, S> {
    fn algorithm(&self) -> SeparationAlgorithm {
        SeparationAlgorithm::Macenko
    }

    fn compute_stain_vectors(&self, out: &mut StainVectors) -> StainResult<()> {
        SeparationAlgorithm::Macenko.check_stain_count(self.input.num_stains)?;
        let params = self.input.parameters;
        if params.percentile.is_nan() || params.percentile <= 0.0 {
            return Err(StainError::InvalidInput(format!(
                "percentile must be positive, got {}",
                params.percentile
            )));
        }
        if params.histogram_bins == 0 {
            return Err(StainError::InvalidInput("histogram needs at least one bin".into()));
        }
        self.input.check_abort()?;

        let samples = self.input.sample_optical_density(self.num_pixels)?;
        self.input.check_abort()?;

        let stains = macenko_stages(&samples.view(), params.percentile, params.histogram_bins, || {
            self.input.check_abort()
        })?
        .ok_or_else(|| StainError::Computation("no stain directions found for the samples".into()))?;
        let flat = to_flat(&stains.view())
            .ok_or_else(|| StainError::Computation("unexpected stain matrix shape".into()))?;
        self.input.check_abort()?;

        info!(
            "Macenko: {} samples, percentile {}, stains {:?}",
            samples.nrows(),
            params.percentile,
            &flat[..6]
        );
        *out = flat;
        Ok(())
    }

    fn set_sample_size(&mut self, num_pixels: usize) {
        self.num_pixels = num_pixels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortSignal;
    use crate::config::EstimationParameters;
    use crate::image::{InMemoryImage, RegionOfInterest, RgbImage};
    use ndarray::array;

    fn unit(v: [f64; 3]) -> [f64; 3] {
        let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        v.map(|x| x / n)
    }

    fn cosine(a: &[f64], b: [f64; 3]) -> f64 {
        let b = unit(b);
        a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
    }

    /// Mixtures of two stains, including pure pixels of each
    fn mixtures(h: [f64; 3], e: [f64; 3]) -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..=20 {
            for j in 0..=20 {
                if i + j == 0 {
                    continue;
                }
                let (a, b) = (i as f64 / 20.0, j as f64 / 20.0);
                rows.extend_from_slice(&[a * h[0] + b * e[0], a * h[1] + b * e[1], a * h[2] + b * e[2]]);
            }
        }
        let n = rows.len() / 3;
        Array2::from_shape_vec((n, 3), rows).unwrap()
    }

    #[test]
    fn test_recovers_pure_stain_directions() {
        let h = [0.65, 0.70, 0.29];
        let e = [0.07, 0.99, 0.11];
        let od = mixtures(h, e);
        let stains = separate_stains_macenko(&od.view(), 100.0, 1024).unwrap();
        assert_eq!(stains.dim(), (2, 3));
        let r0 = stains.row(0).to_vec();
        let r1 = stains.row(1).to_vec();
        let matched = (cosine(&r0, h) > 0.999 && cosine(&r1, e) > 0.999)
            || (cosine(&r0, e) > 0.999 && cosine(&r1, h) > 0.999);
        assert!(matched, "{stains:?}");
    }

    #[test]
    fn test_nonfinite_rows_dropped() {
        let od = array![
            [0.5, 0.2, 0.1],
            [f64::NAN, 0.1, 0.1],
            [0.2, 0.6, 0.1],
            [0.4, 0.4, 0.1],
            [0.3, 0.5, 0.1],
            [0.45, 0.3, 0.1]
        ];
        let stains = separate_stains_macenko(&od.view(), 100.0, 64).unwrap();
        assert!(stains.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_too_few_rows() {
        let od = array![[0.5, 0.2, 0.1], [0.2, 0.6, 0.1]];
        assert!(separate_stains_macenko(&od.view(), 98.0, 64).is_none());
    }

    fn two_stain_image() -> InMemoryImage {
        let mut im = RgbImage::filled(64, 64, [255, 255, 255]);
        for y in 0..64 {
            for x in 0..64 {
                let rgb = match (x / 16 + y / 16) % 3 {
                    0 => [200, 50, 50],
                    1 => [50, 180, 60],
                    _ => [120, 110, 60],
                };
                im.put_pixel(x, y, rgb);
            }
        }
        InMemoryImage::new(im, (32, 32))
    }

    #[test]
    fn test_rejects_three_stains_without_writing() {
        let src = two_stain_image();
        let params = EstimationParameters::default();
        let input = EstimatorInput {
            source: &src,
            num_stains: 3,
            parameters: &params,
            regions: &[] as &[RegionOfInterest],
            abort: None,
        };
        let est = MacenkoEstimator::new(input);
        let mut out = [7.0; 9];
        let err = est.compute_stain_vectors(&mut out).unwrap_err();
        assert!(matches!(err, StainError::UnsupportedStainCount { requested: 3, .. }));
        assert_eq!(out, [7.0; 9]);
    }

    #[test]
    fn test_estimates_from_image() {
        let src = two_stain_image();
        let params = EstimationParameters {
            num_pixels: 2000,
            ..Default::default()
        };
        let input = EstimatorInput {
            source: &src,
            num_stains: 2,
            parameters: &params,
            regions: &[],
            abort: None,
        };
        let mut est = MacenkoEstimator::new(input);
        let mut out = [0.0; 9];
        est.compute_stain_vectors_with_sample_size(&mut out, 1500).unwrap();
        for r in 0..2 {
            let n = (out[r * 3].powi(2) + out[r * 3 + 1].powi(2) + out[r * 3 + 2].powi(2)).sqrt();
            assert!((n - 1.0).abs() < 1e-9);
        }
        assert_eq!(&out[6..], &[0.0; 3]);
    }

    #[test]
    fn test_estimator_matches_array_kernel() {
        let src = two_stain_image();
        let params = EstimationParameters {
            num_pixels: 1200,
            ..Default::default()
        };
        let input = EstimatorInput {
            source: &src,
            num_stains: 2,
            parameters: &params,
            regions: &[],
            abort: None,
        };
        let samples = input.sample_optical_density(params.num_pixels).unwrap();
        let expected = separate_stains_macenko(&samples.view(), params.percentile, params.histogram_bins).unwrap();

        let mut out = [0.0; 9];
        MacenkoEstimator::new(input).compute_stain_vectors(&mut out).unwrap();
        assert_eq!(out, to_flat(&expected.view()).unwrap());
    }

    #[test]
    fn test_abort_leaves_output() {
        let src = two_stain_image();
        let params = EstimationParameters::default();
        let abort = AbortSignal::new();
        abort.abort();
        let input = EstimatorInput {
            source: &src,
            num_stains: 2,
            parameters: &params,
            regions: &[],
            abort: Some(&abort),
        };
        let mut out = [1.0; 9];
        let r = MacenkoEstimator::new(input).compute_stain_vectors(&mut out);
        assert_eq!(r, Err(StainError::Aborted));
        assert_eq!(out, [1.0; 9]);
    }
}
