use crate::float_trait::StainFloat;
use ndarray::{Array2, ArrayView2};

/// Flat row-major 3×3 stain matrix, one stain per row, unused trailing
/// rows zero-filled.
pub type StainVectors = [f64; 9];

/// Maximum number of stains a matrix can hold.
pub const MAX_STAINS: usize = 3;

/// Ordering applied by [`sort_stain_vectors`], keyed on the red-channel OD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// High red OD first
    #[default]
    Descending,
    Ascending,
}

/// Divide every row of a flat stain matrix by its Euclidean norm. Zero rows stay zero.
pub fn normalize_flat(m: &StainVectors) -> StainVectors {
    let mut out = *m;
    for row in out.chunks_exact_mut(3) {
        let norm = (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt();
        if norm != 0.0 && norm.is_finite() {
            row.iter_mut().for_each(|v| *v /= norm);
        }
    }
    out
}

/// Reorder the rows of a matrix by red-channel value. The sort is stable.
pub fn sort_rows<F: StainFloat>(m: &ArrayView2<F>, order: SortOrder) -> Array2<F> {
    if m.ncols() == 0 {
        return m.to_owned();
    }
    let mut idx: Vec<usize> = (0..m.nrows()).collect();
    idx.sort_by(|&a, &b| {
        let (ra, rb) = (m[[a, 0]], m[[b, 0]]);
        let ord = ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal);
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
    m.select(ndarray::Axis(0), &idx)
}

/// Sort the first `num_stains` rows of a flat stain matrix by red-channel OD.
///
/// Rows past `num_stains` are padding and keep their position.
pub fn sort_stain_vectors(m: &StainVectors, num_stains: usize, order: SortOrder) -> StainVectors {
    let n = num_stains.min(MAX_STAINS);
    let mut rows: Vec<[f64; 3]> = m.chunks_exact(3).map(|r| [r[0], r[1], r[2]]).collect();
    rows[..n].sort_by(|a, b| {
        let ord = a[0].partial_cmp(&b[0]).unwrap_or(std::cmp::Ordering::Equal);
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
    let mut out = [0.0; 9];
    for (i, r) in rows.iter().enumerate() {
        out[i * 3..i * 3 + 3].copy_from_slice(r);
    }
    out
}

/// Flatten an N×3 matrix (N ≤ 3) into the interchange format, zero-padding
/// missing rows. Returns `None` for any other shape.
pub fn to_flat<F: StainFloat>(m: &ArrayView2<F>) -> Option<StainVectors> {
    if m.ncols() != 3 || m.nrows() > MAX_STAINS {
        return None;
    }
    let mut out = [0.0; 9];
    for ((i, j), v) in m.indexed_iter() {
        out[i * 3 + j] = v.to_f64()?;
    }
    Some(out)
}

/// The first `num_rows` rows (clamped to 1..=3) of a flat stain matrix.
pub fn from_flat(m: &StainVectors, num_rows: usize) -> Array2<f64> {
    let n = num_rows.clamp(1, MAX_STAINS);
    Array2::from_shape_fn((n, 3), |(i, j)| m[i * 3 + j])
}

/// Row `i` of a flat stain matrix.
pub fn row(m: &StainVectors, i: usize) -> [f64; 3] {
    [m[i * 3], m[i * 3 + 1], m[i * 3 + 2]]
}

/// Elementwise comparison with an absolute tolerance.
pub fn are_equal(a: &StainVectors, b: &StainVectors, tolerance: f64) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
}
