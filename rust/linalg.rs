use crate::float_trait::StainFloat;
use nalgebra::{Matrix3, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_traits::Float;
use rayon::prelude::*;

/// Ratio of smallest to largest singular value below which a 3×3 matrix is
/// treated as singular.
const SINGULAR_RATIO: f64 = 1e-10;

/// Eigen-decomposition of the 3×3 scatter matrix of a set of row points.
#[derive(Debug, Clone)]
pub struct Eigensystem {
    /// Eigenvalues in descending order
    pub values: [f64; 3],
    /// Unit eigenvectors as rows, matching `values`
    pub vectors: [[f64; 3]; 3],
    /// Column means of the input points
    pub mean: [f64; 3],
}

/// How a stain matrix was inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseKind {
    Exact,
    Pseudo,
    Identity,
}

/// Take an N×3 point matrix and return the eigensystem of its scatter matrix.
///
/// With `center` the scatter is the covariance (scaled by 1/N); without it
/// the raw second moment `XᵀX / N`, whose leading directions pass through
/// the origin. Requires more points than dimensions.
pub fn principal_components<F: StainFloat>(m: &ArrayView2<F>, center: bool) -> Option<Eigensystem> {
    if m.ncols() != 3 || m.nrows() <= 3 {
        return None;
    }
    let n = m.nrows() as f64;
    let mut mean = [0.0; 3];
    for row in m.rows() {
        for c in 0..3 {
            mean[c] += row[c].to_f64()?;
        }
    }
    mean.iter_mut().for_each(|v| *v /= n);

    let offset = if center { mean } else { [0.0; 3] };
    let scatter = m
        .axis_chunks_iter(Axis(0), 4096)
        .into_par_iter()
        .map(|chunk| {
            let mut s = [[0.0f64; 3]; 3];
            for row in chunk.rows() {
                let d = [
                    row[0].to_f64().unwrap_or(0.0) - offset[0],
                    row[1].to_f64().unwrap_or(0.0) - offset[1],
                    row[2].to_f64().unwrap_or(0.0) - offset[2],
                ];
                for i in 0..3 {
                    for j in i..3 {
                        s[i][j] += d[i] * d[j];
                    }
                }
            }
            s
        })
        .reduce(
            || [[0.0f64; 3]; 3],
            |mut a, b| {
                for i in 0..3 {
                    for j in 0..3 {
                        a[i][j] += b[i][j];
                    }
                }
                a
            },
        );

    let cov = Matrix3::from_fn(|i, j| {
        let (r, c) = if i <= j { (i, j) } else { (j, i) };
        scatter[r][c] / n
    });
    if cov.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let eig = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let mut values = [0.0; 3];
    let mut vectors = [[0.0; 3]; 3];
    for (k, &idx) in order.iter().enumerate() {
        values[k] = eig.eigenvalues[idx];
        let col = eig.eigenvectors.column(idx);
        let mut v = [col[0], col[1], col[2]];
        // Deterministic sign: largest-magnitude element positive
        let lead = v
            .iter()
            .copied()
            .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if lead < 0.0 {
            v.iter_mut().for_each(|x| *x = -*x);
        }
        vectors[k] = v;
    }
    Some(Eigensystem {
        values,
        vectors,
        mean,
    })
}

/// Get the magnitude of each row vector in a matrix
pub fn magnitude<F: StainFloat>(m: &ArrayView2<F>) -> Array1<F> {
    let v: Vec<F> = (0..m.nrows())
        .into_par_iter()
        .map(|i| Float::sqrt(m.row(i).dot(&m.row(i))))
        .collect();
    Array1::from(v)
}

/// Normalize each row vector in a matrix. Zero rows are returned unchanged.
pub fn normalize_rows<F: StainFloat>(m: &ArrayView2<F>) -> Array2<F> {
    let mag = magnitude(m);
    let mut result = m.to_owned();
    result
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let norm = mag[i];
            if norm != F::zero() && Float::is_finite(norm) {
                row.mapv_inplace(|v| v / norm);
            }
        });
    result
}

/// Invert a 3×3 matrix, degrading gracefully when it is singular.
///
/// Well-conditioned input gets the exact inverse; rank-deficient input the
/// SVD pseudo-inverse; anything that still produces non-finite values falls
/// back to the identity, so callers never see NaN or infinity.
pub fn invert_or_fallback(m: &[[f64; 3]; 3]) -> ([[f64; 3]; 3], InverseKind) {
    let mat = Matrix3::from_fn(|i, j| m[i][j]);
    let svd = mat.svd(false, false);
    let smax = svd.singular_values.max();
    let smin = svd.singular_values.min();
    let well_conditioned = smax > 0.0 && smax.is_finite() && smin / smax > SINGULAR_RATIO;

    if well_conditioned {
        if let Some(inv) = mat.try_inverse() {
            if inv.iter().all(|v| v.is_finite()) {
                return (to_rows(&inv), InverseKind::Exact);
            }
        }
    }
    if smax > 0.0 && smax.is_finite() {
        let svd = mat.svd(true, true);
        if let Ok(pinv) = svd.pseudo_inverse(smax * SINGULAR_RATIO) {
            if pinv.iter().all(|v| v.is_finite()) {
                return (to_rows(&pinv), InverseKind::Pseudo);
            }
        }
    }
    (to_rows(&Matrix3::identity()), InverseKind::Identity)
}

fn to_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = m[(i, j)];
        }
    }
    out
}

/// Cross product of two 3-vectors
pub fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm3(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_principal_components_of_line() {
        // Points along (1, 2, 2)/3 with small orthogonal jitter
        let mut pts = Vec::new();
        for i in 0..50 {
            let t = i as f64 * 0.1;
            let j = if i % 2 == 0 { 0.01 } else { -0.01 };
            pts.extend_from_slice(&[t / 3.0 + j, 2.0 * t / 3.0, 2.0 * t / 3.0 - j]);
        }
        let m = Array2::from_shape_vec((50, 3), pts).unwrap();
        let eig = principal_components(&m.view(), true).unwrap();
        assert!(eig.values[0] >= eig.values[1] && eig.values[1] >= eig.values[2]);
        let v = eig.vectors[0];
        assert_abs_diff_eq!(v[0], 1.0 / 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(v[1], 2.0 / 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(v[2], 2.0 / 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_principal_components_underdetermined() {
        let m = array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        assert!(principal_components(&m.view(), true).is_none());
    }

    #[test]
    fn test_normalize_rows_keeps_zero_rows() {
        let m = array![[3.0_f64, 4.0, 0.0], [0.0, 0.0, 0.0]];
        let n = normalize_rows(&m.view());
        assert_abs_diff_eq!(n[[0, 0]], 0.6);
        assert_abs_diff_eq!(n[[0, 1]], 0.8);
        assert_eq!(n.row(1).to_vec(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invert_exact() {
        let m = [[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 0.5]];
        let (inv, kind) = invert_or_fallback(&m);
        assert_eq!(kind, InverseKind::Exact);
        assert_abs_diff_eq!(inv[0][0], 0.5);
        assert_abs_diff_eq!(inv[1][1], 0.25);
        assert_abs_diff_eq!(inv[2][2], 2.0);
    }

    #[test]
    fn test_invert_duplicate_rows_is_finite() {
        let r = [0.6, 0.8, 0.0];
        let (inv, kind) = invert_or_fallback(&[r, r, [0.0, 0.0, 1.0]]);
        assert_eq!(kind, InverseKind::Pseudo);
        assert!(inv.iter().flatten().all(|v| v.is_finite()));

        let (inv, kind) = invert_or_fallback(&[[0.0; 3]; 3]);
        assert_eq!(kind, InverseKind::Identity);
        assert_eq!(inv[0][0], 1.0);
    }

    #[test]
    fn test_cross() {
        assert_eq!(cross(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]);
    }
}
