use crate::error::{StainError, StainResult};
use crate::image::ImageSource;
use crate::linalg::normalize_rows;
use crate::stain_estimator::{EstimatorInput, SeparationAlgorithm, StainVectorEstimator};
use crate::stain_matrix::{to_flat, StainVectors};
use log::{debug, info};
use ndarray::{Array2, ArrayView2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Guards the multiplicative update denominators
const EPSILON: f64 = 1e-12;
/// Iterations between convergence checks
const CHECK_INTERVAL: usize = 10;

/// Settings of one factorization run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmfOptions {
    /// Number of stains (columns of W)
    pub rank: usize,
    pub max_iterations: usize,
    /// Stop once the error drop since the last check, relative to the
    /// initial error, falls below this
    pub tolerance: f64,
    pub seed: u64,
}

/// Factorize N×3 optical density samples as `Vᵀ ≈ W·H` with non-negative factors.
///
/// `W` (3×rank) holds the stain vectors in its columns and `H` the per-pixel
/// concentrations. Lee–Seung multiplicative updates keep both factors
/// non-negative; the seeded random start makes the result deterministic.
/// Returns the stain vectors as unit rows (rank×3), or `None` for empty,
/// negative, or non-finite input.
pub fn separate_stains_nmf(od: &ArrayView2<f64>, options: &NmfOptions) -> Option<Array2<f64>> {
    let n = od.nrows();
    let k = options.rank;
    if od.ncols() != 3 || n == 0 || k == 0 {
        return None;
    }
    if od.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    let v = od.t();
    let mean = v.mean()?;
    if mean <= 0.0 {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let scale = (mean / k as f64).sqrt();
    let mut w = Array2::from_shape_simple_fn((3, k), || scale * rng.random_range(0.01..1.0));
    let mut h = Array2::from_shape_simple_fn((k, n), || scale * rng.random_range(0.01..1.0));

    let initial_error = reconstruction_error(&v, &w, &h);
    let mut previous_error = initial_error;
    let mut iterations = 0;
    for it in 1..=options.max_iterations {
        iterations = it;
        // H <- H * (WᵀV) / (WᵀWH)
        let numer = w.t().dot(&v);
        let denom = w.t().dot(&w).dot(&h);
        Zip::from(&mut h)
            .and(&numer)
            .and(&denom)
            .par_for_each(|h, &a, &b| *h *= a / (b + EPSILON));

        // W <- W * (VHᵀ) / (WHHᵀ)
        let numer = v.dot(&h.t());
        let denom = w.dot(&h.dot(&h.t()));
        Zip::from(&mut w)
            .and(&numer)
            .and(&denom)
            .for_each(|w, &a, &b| *w *= a / (b + EPSILON));

        if it % CHECK_INTERVAL == 0 {
            let error = reconstruction_error(&v, &w, &h);
            if initial_error > 0.0 && (previous_error - error) / initial_error < options.tolerance {
                break;
            }
            previous_error = error;
        }
    }
    debug!(
        "NMF rank {} on {} samples: {} iterations, error {:.3e} -> {:.3e}",
        k,
        n,
        iterations,
        initial_error,
        reconstruction_error(&v, &w, &h)
    );

    let stains = normalize_rows(&w.t());
    stains.iter().all(|x| x.is_finite()).then_some(stains)
}

/// Frobenius norm of `V - WH`
fn reconstruction_error(v: &ArrayView2<f64>, w: &Array2<f64>, h: &Array2<f64>) -> f64 {
    let wh = w.dot(h);
    Zip::from(v)
        .and(&wh)
        .fold(0.0, |acc, &a, &b| acc + (a - b) * (a - b))
        .sqrt()
}

/// Two-stain estimator factorizing randomly sampled tissue pixels.
pub struct NmfEstimator<'a, S: ImageSource + ?Sized> {
    input: EstimatorInput<'a, S>,
    num_pixels: usize,
}

impl<'a, S: ImageSource + ?Sized> NmfEstimator<'a, S> {
    pub fn new(input: EstimatorInput<'a, S>) -> Self {
        Self {
            num_pixels: input.parameters.num_pixels,
            input,
        }
    }
}

impl<S: ImageSource + ?Sized> StainVectorEstimator for NmfEstimator<'_, S> {
    fn algorithm(&self) -> SeparationAlgorithm {
        SeparationAlgorithm::Nmf
    }

    fn compute_stain_vectors(&self, out: &mut StainVectors) -> StainResult<()> {
        SeparationAlgorithm::Nmf.check_stain_count(self.input.num_stains)?;
        let params = self.input.parameters;
        self.input.check_abort()?;

        let samples = self.input.sample_optical_density(self.num_pixels)?;
        self.input.check_abort()?;

        let options = NmfOptions {
            rank: self.input.num_stains,
            max_iterations: params.nmf_max_iterations,
            tolerance: params.nmf_tolerance,
            seed: params.seed,
        };
        let stains = separate_stains_nmf(&samples.view(), &options)
            .ok_or_else(|| StainError::Computation("factorization produced no stain vectors".into()))?;
        let flat = to_flat(&stains.view())
            .ok_or_else(|| StainError::Computation("unexpected stain matrix shape".into()))?;
        self.input.check_abort()?;

        info!("NMF: {} samples, stains {:?}", samples.nrows(), &flat[..6]);
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
    use crate::config::EstimationParameters;
    use crate::image::{InMemoryImage, RgbImage};
    use ndarray::array;

    /// Stains on the boundary of the positive octant, so the exact
    /// non-negative factorization is unique up to scale
    const A: [f64; 3] = [0.8, 0.6, 0.0];
    const B: [f64; 3] = [0.0, 0.6, 0.8];

    fn mixtures() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..=15 {
            for j in 0..=15 {
                if i + j == 0 {
                    continue;
                }
                let (a, b) = (i as f64 / 15.0, j as f64 / 15.0);
                rows.extend((0..3).map(|c| a * A[c] + b * B[c]));
            }
        }
        let n = rows.len() / 3;
        Array2::from_shape_vec((n, 3), rows).unwrap()
    }

    fn options() -> NmfOptions {
        NmfOptions {
            rank: 2,
            max_iterations: 3000,
            tolerance: 0.0,
            seed: 11,
        }
    }

    fn cosine(r: ndarray::ArrayView1<f64>, s: [f64; 3]) -> f64 {
        r[0] * s[0] + r[1] * s[1] + r[2] * s[2]
    }

    #[test]
    fn test_recovers_boundary_stains() {
        let stains = separate_stains_nmf(&mixtures().view(), &options()).unwrap();
        assert_eq!(stains.dim(), (2, 3));
        assert!(stains.iter().all(|&v| v >= 0.0));
        let (r0, r1) = (stains.row(0), stains.row(1));
        let best = f64::max(
            cosine(r0, A).min(cosine(r1, B)),
            cosine(r0, B).min(cosine(r1, A)),
        );
        assert!(best > 0.95, "{stains:?}");
    }

    #[test]
    fn test_deterministic_for_seed() {
        let od = mixtures();
        let a = separate_stains_nmf(&od.view(), &options()).unwrap();
        let b = separate_stains_nmf(&od.view(), &options()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_input() {
        let opts = options();
        assert!(separate_stains_nmf(&Array2::<f64>::zeros((0, 3)).view(), &opts).is_none());
        assert!(separate_stains_nmf(&array![[0.1, -0.2, 0.3]].view(), &opts).is_none());
        assert!(separate_stains_nmf(&Array2::<f64>::zeros((5, 3)).view(), &opts).is_none());
    }

    #[test]
    fn test_estimator_writes_unit_rows() {
        let mut im = RgbImage::filled(32, 32, [255, 255, 255]);
        for y in 0..32 {
            for x in 0..32 {
                let rgb = if (x + y) % 2 == 0 { [200, 50, 50] } else { [50, 180, 60] };
                im.put_pixel(x, y, rgb);
            }
        }
        let src = InMemoryImage::new(im, (16, 16));
        let params = EstimationParameters {
            num_pixels: 400,
            nmf_max_iterations: 200,
            ..Default::default()
        };
        let est = NmfEstimator::new(EstimatorInput {
            source: &src,
            num_stains: 2,
            parameters: &params,
            regions: &[],
            abort: None,
        });
        let mut out = [0.0; 9];
        est.compute_stain_vectors(&mut out).unwrap();
        for r in 0..2 {
            let n: f64 = out[r * 3..r * 3 + 3].iter().map(|v| v * v).sum();
            assert!((n.sqrt() - 1.0).abs() < 1e-9);
        }
        assert!(out.iter().all(|&v| v >= 0.0));
    }
}
