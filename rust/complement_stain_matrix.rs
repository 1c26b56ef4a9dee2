use crate::linalg::{cross, norm3};
use crate::stain_matrix::{normalize_flat, row, StainVectors};

/// Generates a complemented stain matrix with three independent rows.
///
/// Rows past `num_stains` are replaced: with two stains the third row is
/// the normalized cross product of the first two; with one stain, two
/// orthonormal completions are generated. The result is what the unmixing
/// kernel inverts, so a residual channel always exists.
pub fn complement_stain_matrix(w: &StainVectors, num_stains: usize) -> StainVectors {
    let w = normalize_flat(w);
    let mut out = w;
    match num_stains {
        0 => return identity(),
        1 => {
            let s0 = row(&w, 0);
            let s1 = orthogonal_to(&s0);
            let s2 = unit(cross(&s0, &s1));
            out[3..6].copy_from_slice(&s1);
            out[6..9].copy_from_slice(&s2);
        }
        2 => {
            let s2 = unit(cross(&row(&w, 0), &row(&w, 1)));
            out[6..9].copy_from_slice(&s2);
        }
        _ => {}
    }
    out
}

fn identity() -> StainVectors {
    [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
}

fn unit(v: [f64; 3]) -> [f64; 3] {
    let n = norm3(&v);
    if n == 0.0 || !n.is_finite() {
        v
    } else {
        v.map(|x| x / n)
    }
}

/// A unit vector orthogonal to `v`, built against the axis `v` is least aligned with.
fn orthogonal_to(v: &[f64; 3]) -> [f64; 3] {
    let axis = if v[0].abs() <= v[1].abs() && v[0].abs() <= v[2].abs() {
        [1.0, 0.0, 0.0]
    } else if v[1].abs() <= v[2].abs() {
        [0.0, 1.0, 0.0]
    } else {
        [0.0, 0.0, 1.0]
    };
    unit(cross(v, &axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
        a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
    }

    #[test]
    fn test_two_stains_get_cross_product() {
        let w = [0.65, 0.70, 0.29, 0.07, 0.99, 0.11, 0.0, 0.0, 0.0];
        let c = complement_stain_matrix(&w, 2);
        let s2 = row(&c, 2);
        assert_abs_diff_eq!(norm3(&s2), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dot(s2, row(&c, 0)), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dot(s2, row(&c, 1)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_one_stain_gets_orthonormal_completion() {
        let c = complement_stain_matrix(&[0.2, 0.9, 0.4, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1);
        let (a, b, d) = (row(&c, 0), row(&c, 1), row(&c, 2));
        assert_abs_diff_eq!(dot(a, b), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dot(a, d), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dot(b, d), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_three_stains_only_normalized() {
        let w = [2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 4.0];
        assert_eq!(complement_stain_matrix(&w, 3), identity());
    }
}
